//! CLI tool for analyzing npm packages

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use npm_package_insight::{
    group_thousands, AnalysisError, AnalysisResult, AnalyzerConfig, PackageAnalyzer, Rating,
    Recommendation, SecuritySummary, Severity, SimilarPackage,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "npm-insight")]
#[command(about = "Analyze npm packages for popularity, maintenance, and security risks", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to custom configuration file (TOML)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full analysis of a package
    Analyze {
        /// Package name, e.g. "express" or "@babel/core"
        package: String,

        /// Ask the configured AI providers for a verdict
        #[arg(long)]
        ai: bool,

        /// Output format
        #[arg(short = 'f', long, default_value = "text")]
        format: ReportFormat,

        /// Output file (default: stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Fail if the quality score is below this threshold (0-100)
        #[arg(long)]
        fail_below: Option<u8>,
    },

    /// Check advisories against a specific version
    Security {
        /// Package name
        package: String,

        /// Version to check, e.g. "4.17.20"
        version: String,

        /// Output format
        #[arg(short = 'f', long, default_value = "text")]
        format: ReportFormat,
    },

    /// List packages similar to the given one
    Similar {
        /// Package name
        package: String,

        /// Maximum number of packages to list
        #[arg(short = 'n', long, default_value = "6")]
        limit: usize,

        /// Search these keywords instead of the package's own (comma separated)
        #[arg(short = 'k', long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Output format
        #[arg(short = 'f', long, default_value = "text")]
        format: ReportFormat,
    },
}

#[derive(Clone, Copy, Debug)]
enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => match load_config(config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{} Failed to load config: {:#}", "Error:".red().bold(), e);
                process::exit(1);
            }
        },
        None => AnalyzerConfig::default(),
    }
    .with_env_credentials();

    if let Commands::Analyze { ai: true, .. } = cli.command {
        config.narrative.enabled = true;
    }

    let analyzer = match PackageAnalyzer::new(&config) {
        Ok(analyzer) => analyzer,
        Err(e) => exit_with(&e),
    };

    match cli.command {
        Commands::Analyze {
            package,
            format,
            output,
            fail_below,
            ..
        } => {
            let result = with_spinner(
                format!("Analyzing {}...", package),
                analyzer.analyze(&package),
            )
            .await
            .unwrap_or_else(|e| exit_with(&e));

            match format {
                ReportFormat::Text if output.is_none() => display_analysis(&result),
                ReportFormat::Text => write_output(output.as_deref(), plain_report(&result)),
                ReportFormat::Json => write_output(output.as_deref(), to_json(&result)),
                ReportFormat::Markdown => {
                    write_output(output.as_deref(), generate_markdown_report(&result))
                }
            }

            if let Some(threshold) = fail_below {
                if result.quality_score < threshold {
                    eprintln!(
                        "\n{} {} scored {} (below threshold {})",
                        "Failed:".red().bold(),
                        result.package,
                        result.quality_score,
                        threshold
                    );
                    process::exit(1);
                }
            }
        }

        Commands::Security {
            package,
            version,
            format,
        } => {
            let summary = with_spinner(
                format!("Checking advisories for {}@{}...", package, version),
                analyzer.check_security(&package, &version),
            )
            .await
            .unwrap_or_else(|e| exit_with(&e));

            match format {
                ReportFormat::Json => println!(
                    "{}",
                    to_json(&serde_json::json!({
                        "package": package,
                        "version": version,
                        "security": summary,
                    }))
                ),
                ReportFormat::Markdown => {
                    println!("# Security check: {}@{}\n", package, version);
                    println!("{}", markdown_security(&summary));
                }
                ReportFormat::Text => {
                    println!("\n{} {}@{}", "=== Security Check ===".bold(), package.cyan(), version);
                    display_security(&summary, &version);
                }
            }
        }

        Commands::Similar {
            package,
            limit,
            keywords,
            format,
        } => {
            let similar = with_spinner(
                format!("Searching packages similar to {}...", package),
                analyzer.similar_packages_for_keywords(&package, &keywords, limit),
            )
            .await
            .unwrap_or_else(|e| exit_with(&e));

            match format {
                ReportFormat::Json => println!("{}", to_json(&similar)),
                ReportFormat::Markdown => println!("{}", markdown_similar(&package, &similar)),
                ReportFormat::Text => display_similar(&package, &similar),
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<AnalyzerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let config: AnalyzerConfig =
        toml::from_str(&content).with_context(|| format!("invalid TOML in {}", path.display()))?;
    Ok(config)
}

async fn with_spinner<T>(message: String, work: impl Future<Output = T>) -> T {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let output = work.await;

    spinner.finish_and_clear();
    output
}

/// Print a failure and exit; not found, rate limited and generic errors read differently
fn exit_with(err: &AnalysisError) -> ! {
    match err {
        AnalysisError::InvalidInput(msg) => {
            eprintln!("{} {}", "Invalid input:".red().bold(), msg);
        }
        AnalysisError::NotFound(_) => {
            eprintln!("{} {}", "Not found:".red().bold(), err);
        }
        AnalysisError::ConfigError(_) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
        }
        AnalysisError::Upstream(e) if e.is_rate_limited() => {
            eprintln!("{} {}", "Rate limited:".yellow().bold(), e);
        }
        _ => {
            eprintln!("{} Analysis failed: {}", "Error:".red().bold(), err);
        }
    }

    if let Some(hint) = err.remediation() {
        eprintln!("  {} {}", "Hint:".cyan(), hint);
    }
    process::exit(1);
}

fn write_output(output: Option<&Path>, content: String) {
    match output {
        Some(path) => match std::fs::write(path, content) {
            Ok(_) => println!("Report written to: {}", path.display()),
            Err(e) => {
                eprintln!("{} Failed to write report: {}", "Error:".red().bold(), e);
                process::exit(1);
            }
        },
        None => println!("{}", content),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        eprintln!("Failed to serialize report: {}", e);
        process::exit(1);
    })
}

fn display_analysis(result: &AnalysisResult) {
    let registry = &result.registry;

    println!("\n{}", "=== Package Analysis ===".bold());
    println!("{} v{}", result.package.to_string().cyan().bold(), registry.latest_version);
    if let Some(description) = &registry.description {
        println!("{}", description);
    }
    println!();

    if let Some(scope) = result.package.scope() {
        println!("Scope: @{}", scope);
    }
    println!("License: {}", registry.license.as_deref().unwrap_or("Unknown"));
    match result.days_since_last_publish() {
        Some(days) => println!("Last published: {} days ago", days.max(0)),
        None => println!("Last published: unknown"),
    }
    println!("Versions published: {}", registry.version_count);
    println!("npm: {}", result.npm_url());
    if let Some(repo) = &registry.repository_url {
        println!("Repository: {}", repo);
    }
    if let Some(notice) = &registry.deprecated {
        println!("{} {}", "Deprecated:".red().bold(), notice);
    }
    println!();

    println!("Metrics:");
    if let Some(downloads) = &result.downloads {
        println!("  Downloads (last month): {}", group_thousands(downloads.downloads));
    }
    if let Some(dependents) = result.popularity.as_ref().and_then(|p| p.dependents) {
        println!("  Dependents: {}", group_thousands(dependents));
    }
    if let Some(repo) = &result.repository {
        println!(
            "  {} {}: {} stars, {} forks, {} open issues{}",
            repo.host,
            repo.full_name,
            group_thousands(repo.stars),
            group_thousands(repo.forks),
            group_thousands(repo.open_issues),
            if repo.archived { " (archived)" } else { "" }
        );
    }
    println!();

    println!("Security:");
    display_security(&result.security, &registry.latest_version);
    println!();

    println!("Quality score: {}", score_colored(result.quality_score));

    if let Some(verdict) = &result.verdict {
        println!(
            "\n{} {}",
            "=== AI Verdict ===".bold(),
            verdict.model.as_deref().unwrap_or_default().dimmed()
        );
        println!("Recommendation: {}", recommendation_colored(verdict.recommendation));
        println!("Score: {}", score_colored(verdict.overall_score));
        println!(
            "Security: {}  Quality: {}  Maintenance: {}",
            rating_colored(verdict.security_rating),
            rating_colored(verdict.quality_rating),
            rating_colored(verdict.maintenance_rating)
        );
        println!("\n{}", verdict.summary);
        println!("\nStrengths:");
        for strength in &verdict.strengths {
            println!("  + {}", strength.green());
        }
        println!("Concerns:");
        for concern in &verdict.concerns {
            println!("  - {}", concern.yellow());
        }
        println!("\n{}", verdict.reasoning);
    }

    if !result.errors.is_empty() {
        println!("\n{}", "Unavailable sources:".yellow().bold());
        for (source, failure) in &result.errors {
            println!("  - {}: {}", source, failure.message());
            if let Some(hint) = failure.hint() {
                println!("    {} {}", "Hint:".cyan(), hint);
            }
        }
    }
}

fn display_security(summary: &SecuritySummary, version: &str) {
    if !summary.has_vulnerabilities() {
        println!("  {} No known vulnerabilities affecting v{}", "●".green(), version);
        return;
    }

    println!(
        "  {} {} applicable advisories ({} critical, {} high, {} moderate, {} low)",
        "●".red(),
        summary.total_count(),
        summary.critical(),
        summary.high(),
        summary.moderate(),
        summary.low()
    );
    for advisory in summary.vulnerabilities() {
        let patched = advisory
            .first_patched_version
            .as_deref()
            .map(|v| format!(" (patched in {})", v))
            .unwrap_or_default();
        println!(
            "    [{}] {} {}{}",
            severity_colored(advisory.severity),
            advisory.id,
            advisory.summary,
            patched
        );
        if let Some(url) = &advisory.url {
            println!("      {}", url.dimmed());
        }
    }
}

fn display_similar(package: &str, similar: &[SimilarPackage]) {
    println!("\n{} {}", "=== Similar Packages ===".bold(), package.cyan());
    if similar.is_empty() {
        println!("No similar packages found");
        return;
    }
    for pkg in similar {
        println!("{} v{}", pkg.name.bold(), pkg.version);
        if let Some(description) = &pkg.description {
            println!("  {}", description);
        }
    }
}

fn plain_report(result: &AnalysisResult) -> String {
    let mut out = format!(
        "{} v{}\nQuality score: {}/100\nApplicable advisories: {}\n",
        result.package,
        result.registry.latest_version,
        result.quality_score,
        result.security.total_count()
    );
    for (source, failure) in &result.errors {
        out.push_str(&format!("Unavailable {}: {}\n", source, failure.message()));
    }
    out
}

fn generate_markdown_report(result: &AnalysisResult) -> String {
    let registry = &result.registry;
    let mut md = String::new();

    md.push_str(&format!("# Package Analysis: {}\n\n", result.package));
    md.push_str(&format!("**Generated:** {}\n\n", result.analyzed_at));
    if let Some(description) = &registry.description {
        md.push_str(&format!("{}\n\n", description));
    }

    md.push_str("## Overview\n\n");
    md.push_str(&format!("- Latest version: {}\n", registry.latest_version));
    md.push_str(&format!(
        "- License: {}\n",
        registry.license.as_deref().unwrap_or("Unknown")
    ));
    if let Some(days) = result.days_since_last_publish() {
        md.push_str(&format!("- Last published: {} days ago\n", days.max(0)));
    }
    if let Some(downloads) = &result.downloads {
        md.push_str(&format!(
            "- Downloads (last month): {}\n",
            group_thousands(downloads.downloads)
        ));
    }
    if let Some(repo) = &result.repository {
        md.push_str(&format!(
            "- {}: {} ({} stars, {} open issues)\n",
            repo.host,
            repo.full_name,
            group_thousands(repo.stars),
            group_thousands(repo.open_issues)
        ));
    }
    if let Some(notice) = &registry.deprecated {
        md.push_str(&format!("- **Deprecated:** {}\n", notice));
    }
    md.push_str(&format!("- Quality score: **{}/100**\n\n", result.quality_score));

    md.push_str("## Security\n\n");
    md.push_str(&markdown_security(&result.security));

    if let Some(verdict) = &result.verdict {
        md.push_str("\n## AI Verdict\n\n");
        md.push_str(&format!(
            "**{}** ({}/100){}\n\n",
            verdict.recommendation,
            verdict.overall_score,
            verdict
                .model
                .as_deref()
                .map(|m| format!(" by {}", m))
                .unwrap_or_default()
        ));
        md.push_str(&format!("{}\n\n", verdict.summary));
        md.push_str("| Security | Quality | Maintenance |\n");
        md.push_str("|----------|---------|-------------|\n");
        md.push_str(&format!(
            "| {} | {} | {} |\n\n",
            verdict.security_rating, verdict.quality_rating, verdict.maintenance_rating
        ));
        md.push_str("**Strengths**\n\n");
        for strength in &verdict.strengths {
            md.push_str(&format!("- {}\n", strength));
        }
        md.push_str("\n**Concerns**\n\n");
        for concern in &verdict.concerns {
            md.push_str(&format!("- {}\n", concern));
        }
        md.push_str(&format!("\n{}\n", verdict.reasoning));
    }

    if !result.errors.is_empty() {
        md.push_str("\n## Unavailable Sources\n\n");
        for (source, failure) in &result.errors {
            md.push_str(&format!("- **{}**: {}", source, failure.message()));
            if let Some(hint) = failure.hint() {
                md.push_str(&format!(" _({})_", hint));
            }
            md.push('\n');
        }
    }

    md
}

fn markdown_security(summary: &SecuritySummary) -> String {
    if !summary.has_vulnerabilities() {
        return "No known vulnerabilities.\n".to_string();
    }

    let severities = [Severity::Critical, Severity::High, Severity::Moderate, Severity::Low];
    let breakdown: Vec<String> = severities
        .into_iter()
        .filter(|severity| summary.count(*severity) > 0)
        .map(|severity| format!("{} {}", summary.count(severity), severity))
        .collect();

    let mut md = format!(
        "{} applicable advisories ({})\n\n",
        summary.total_count(),
        breakdown.join(", ")
    );
    md.push_str("| Severity | ID | Summary | Patched |\n");
    md.push_str("|----------|----|---------|---------|\n");
    for advisory in summary.vulnerabilities() {
        md.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            advisory.severity,
            advisory.id,
            advisory.summary.replace('|', "\\|"),
            advisory.first_patched_version.as_deref().unwrap_or("-")
        ));
    }
    md
}

fn markdown_similar(package: &str, similar: &[SimilarPackage]) -> String {
    let mut md = format!("# Packages similar to {}\n\n", package);
    md.push_str("| Name | Version | Description |\n");
    md.push_str("|------|---------|-------------|\n");
    for pkg in similar {
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            pkg.name,
            pkg.version,
            pkg.description.as_deref().unwrap_or("").replace('|', "\\|")
        ));
    }
    md
}

fn score_colored(score: u8) -> ColoredString {
    let text = format!("{}/100", score);
    match score {
        80.. => text.green().bold(),
        60..=79 => text.yellow().bold(),
        _ => text.red().bold(),
    }
}

fn severity_colored(severity: Severity) -> ColoredString {
    let label = severity.to_string().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Moderate => label.yellow(),
        Severity::Low => label.normal(),
    }
}

fn recommendation_colored(recommendation: Recommendation) -> ColoredString {
    let label = recommendation.to_string();
    match recommendation {
        Recommendation::Recommended => label.green().bold(),
        Recommendation::UseWithCaution => label.yellow().bold(),
        Recommendation::NotRecommended => label.red().bold(),
    }
}

fn rating_colored(rating: Rating) -> ColoredString {
    let label = rating.to_string();
    match rating {
        Rating::Excellent => label.green().bold(),
        Rating::Good => label.green(),
        Rating::Fair => label.yellow(),
        Rating::Poor => label.red(),
    }
}
