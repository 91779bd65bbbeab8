/// Tag Linter: checks scripted replies and prompts for tag and punctuation problems.
///
/// Usage: tag_linter <file_or_dir> [--locale japanese|latin]
///
/// Every `.txt` file is read as one reply. Reported:
///   ERROR    tags that are not one of the five emotions
///   WARNING  sentences spoken without any emotion tag
///   WARNING  bracket-only fragments that will never be spoken
///   WARNING  trailing text with no terminal punctuation (never spoken)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use streamer_speech::core::splitter::{Locale, SentenceSplitter, Split, SplitRules};
use streamer_speech::core::tag::{extract_leading_tag, find_tags};
use streamer_speech::schema::emotion::Emotion;

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
    units: usize,
    unknown_tags: BTreeMap<String, usize>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: tag_linter <file_or_dir> [--locale japanese|latin]");
        process::exit(0);
    }

    let target = &args[1];
    let mut locale = Locale::Japanese;

    let mut i = 2;
    while i < args.len() {
        if args[i] == "--locale" && i + 1 < args.len() {
            i += 1;
            locale = match args[i].to_lowercase().as_str() {
                "latin" => Locale::Latin,
                "japanese" => Locale::Japanese,
                other => {
                    eprintln!("ERROR: Unknown locale '{}'", other);
                    process::exit(1);
                }
            };
        }
        i += 1;
    }

    let splitter = match SentenceSplitter::new(SplitRules::for_locale(locale)) {
        Ok(splitter) => splitter,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    };

    let path = Path::new(target);
    let mut files = Vec::new();
    if path.is_file() {
        files.push(path.to_path_buf());
    } else if path.is_dir() {
        collect_replies(path, &mut files);
    } else {
        eprintln!("ERROR: Path '{}' does not exist", target);
        process::exit(1);
    }
    files.sort();

    println!("Linting {} file(s)", files.len());

    let mut report = Report::default();
    for file in &files {
        match std::fs::read_to_string(file) {
            Ok(contents) => lint_reply(&splitter, &file.display().to_string(), &contents, &mut report),
            Err(e) => report
                .errors
                .push(format!("{}: could not read: {}", file.display(), e)),
        }
    }

    println!("\n=== Tag Lint Report ===\n");

    if report.errors.is_empty() && report.warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }

    for error in &report.errors {
        println!("ERROR: {}", error);
    }

    if !report.unknown_tags.is_empty() {
        println!("\nUnknown tags:");
        for (tag, count) in &report.unknown_tags {
            println!("  [{}] x{}", tag, count);
        }
    }

    println!(
        "\nSummary: {} speakable units, {} errors, {} warnings",
        report.units,
        report.errors.len(),
        report.warnings.len()
    );

    if report.errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn collect_replies(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_replies(&path, files);
            } else if path.extension().and_then(|s| s.to_str()) == Some("txt") {
                files.push(path);
            }
        }
    }
}

fn lint_reply(splitter: &SentenceSplitter, name: &str, contents: &str, report: &mut Report) {
    for tag in find_tags(contents) {
        if tag.parse::<Emotion>().is_err() {
            report.errors.push(format!("{}: unknown tag [{}]", name, tag));
            *report.unknown_tags.entry(tag.to_string()).or_insert(0) += 1;
        }
    }

    let mut buffer = contents.to_string();
    let mut tagged = false;
    loop {
        if extract_leading_tag(&mut buffer).is_some() {
            tagged = true;
        }
        let (text, rest, speakable) = match splitter.split_next(&buffer) {
            Split::Match {
                text,
                rest,
                speakable,
            } => (text.to_string(), rest.to_string(), speakable),
            Split::NoMatch => break,
        };
        buffer = rest;

        if !speakable {
            report
                .warnings
                .push(format!("{}: fragment {:?} is never spoken", name, text));
            continue;
        }
        if !tagged {
            report
                .warnings
                .push(format!("{}: {:?} has no emotion tag", name, text.trim()));
        }
        report.units += 1;
    }

    if !buffer.trim().is_empty() {
        report.warnings.push(format!(
            "{}: trailing text {:?} has no terminal punctuation",
            name,
            buffer.trim()
        ));
    }
}
