pub mod report;
pub mod trace;

use colored::Colorize;

pub fn print_banner() {
    let banner = r#"
                          _ _
  ___ _ __   ___ _ __   __| | |_ _ __ __ _  ___ ___
 / __| '_ \ / _ \ '_ \ / _` | __| '__/ _` |/ __/ _ \
 \__ \ |_) |  __/ | | | (_| | |_| | | (_| | (_|  __/
 |___/ .__/ \___|_| |_|\__,_|\__|_|  \__,_|\___\___|
     |_|"#;
    println!("{}", banner.bright_cyan());
    println!(
        "  {} {}\n",
        "follow a bitcoin output down its spend chain".dimmed(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
