use std::path::Path;

use crate::mirror::MirrorReport;

pub fn print_banner(url: &str, output: &Path) {
    println!("\n{}", "=".repeat(60));
    println!("  CTFd Downloader");
    println!("{}\n", "=".repeat(60));

    println!("Instance: {}", url);
    println!("Output:   {}\n", output.display());
}

pub fn print_summary(report: &MirrorReport) {
    println!("\n{}", "=".repeat(60));
    println!("  Challenges: {} total", report.total);
    println!("  Downloaded: {}", report.downloaded);
    println!("  Skipped:    {} (already downloaded)", report.skipped);
    println!("  Failed:     {}", report.failed);
    if report.failed_files > 0 {
        println!("  Failed files: {}", report.failed_files);
    }
    println!("  Files:      {} ({})", report.files, format_bytes(report.bytes));
    println!("{}", "=".repeat(60));

    if report.failed > 0 {
        println!("Run again to retry the failed challenges.");
    }
    println!();
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
