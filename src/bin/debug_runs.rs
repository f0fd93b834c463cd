use pdf_redactor::{extract_text_with_positions, group_lines, RedactConfig};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: debug_runs <pdf_path> [max_page | min-max] [tolerance]");
        std::process::exit(1);
    }

    let range = args.get(2).map(|s| s.as_str()).unwrap_or("1-3");
    let (min_page, max_page) = if let Some((a, b)) = range.split_once('-') {
        (a.parse().unwrap_or(1), b.parse().unwrap_or(3))
    } else {
        (1, range.parse().unwrap_or(3))
    };
    let tolerance = args
        .get(3)
        .and_then(|t| t.parse().ok())
        .unwrap_or(RedactConfig::default().row_tolerance);

    let runs = extract_text_with_positions(&args[1]).expect("Failed to extract");

    for page in min_page..=max_page {
        let page_runs: Vec<_> = runs.iter().filter(|r| r.page == page).cloned().collect();
        println!("=== PAGE {} ({} runs) ===", page, page_runs.len());
        for run in &page_runs {
            println!(
                "  x={:7.1} y={:7.1} w={:7.1} h={:5.1} font={:<6} text={:?}",
                run.x, run.y, run.width, run.height, run.font, run.text
            );
        }

        let lines = group_lines(&page_runs, tolerance);
        println!("--- {} lines (tolerance {}) ---", lines.len(), tolerance);
        for line in &lines {
            println!("  y={:7.1} [{}] {}", line.y, line.runs.len(), line.text());
        }
        println!();
    }
}
