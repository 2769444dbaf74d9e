//! apitest CLI - declarative HTTP API testing

mod generate;
mod gha;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use apitest_core::{report, validate, Config, RunReport, TestStatus};
use apitest_runner::{ReqwestDriver, SuiteRunner};

#[derive(Parser)]
#[command(name = "apitest")]
#[command(about = "Declarative HTTP API testing: YAML suites in, reports out")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test suites
    Run {
        /// Suite documents to execute
        #[arg(required = true)]
        files: Vec<String>,

        /// Comma-separated tags to include
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Environment override name
        #[arg(long)]
        env: Option<String>,

        /// Parallel workers (default: logical CPUs)
        #[arg(long)]
        parallel: Option<usize>,

        /// Write the JSON report to this path
        #[arg(long)]
        report_json: Option<String>,

        /// Write the HTML report to this path
        #[arg(long)]
        report_html: Option<String>,

        /// Emit GitHub Actions annotations for failures
        #[arg(long)]
        github_actions: bool,

        /// Rerun the suites this many times to detect flaky tests
        #[arg(long, default_value_t = 1)]
        detect_flaky: u32,

        /// Rewrite snapshot baselines instead of comparing
        #[arg(long)]
        update_snapshots: bool,

        /// Skip load block execution
        #[arg(long)]
        no_load: bool,
    },

    /// Check suite documents without running them
    Validate {
        #[arg(required = true)]
        files: Vec<String>,

        /// Environment override name
        #[arg(long)]
        env: Option<String>,
    },

    /// Serve the document's mock routes
    Mock {
        file: String,

        /// Environment override name
        #[arg(long)]
        env: Option<String>,

        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Generate a suite skeleton from an OpenAPI spec
    Generate {
        spec: String,

        /// Output file (default: <spec>.tests.yaml)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Write a GitHub Actions workflow that runs the suites
    GhaInit { path: Option<String> },

    /// Print the JSON Schema of the machine report
    Schema,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            files,
            tags,
            env,
            parallel,
            report_json,
            report_html,
            github_actions,
            detect_flaky,
            update_snapshots,
            no_load,
        } => {
            let driver = ReqwestDriver::new().context("build HTTP client")?;
            let runner = SuiteRunner::new(driver)
                .with_env(env)
                .with_tags(tags)
                .with_detect_flaky_runs(detect_flaky)
                .with_update_snapshots(update_snapshots)
                .with_run_load(!no_load);
            let runner = match parallel {
                Some(parallel) => runner.with_parallel(parallel),
                None => runner,
            };

            let data = runner.run(&files);

            if gha::enabled(github_actions) {
                for failure in &data.failures {
                    println!(
                        "{}",
                        gha::failure_annotation(&failure.file, &failure.test, &failure.why)
                    );
                }
            }

            if let Some(path) = report_json.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                let target = report::resolve_output_path(&files[0], path);
                if let Err(e) = report::write_json(&target, &data) {
                    eprintln!("failed to write JSON report: {e}");
                }
            }
            if let Some(path) = report_html.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
                let target = report::resolve_output_path(&files[0], path);
                if let Err(e) = report::write_html(&target, &data) {
                    eprintln!("failed to write HTML report: {e}");
                }
            }

            print_summary(&data);
            Ok(i32::from(data.has_failures()))
        }

        Commands::Validate { files, env } => {
            let mut has_errors = false;
            for file in &files {
                match Config::load(Path::new(file), env.as_deref()) {
                    Err(e) => {
                        has_errors = true;
                        println!("INVALID {file}");
                        println!("  {e}");
                    }
                    Ok(cfg) => {
                        let issues = validate(&cfg);
                        if issues.is_empty() {
                            println!("VALID   {file}");
                        } else {
                            has_errors = true;
                            println!("INVALID {file}");
                            for issue in issues {
                                println!("  - {issue}");
                            }
                        }
                    }
                }
            }
            Ok(i32::from(has_errors))
        }

        Commands::Mock { file, env, port } => {
            let cfg = Config::load(Path::new(&file), env.as_deref())?;
            apitest_runner::mock::serve(&cfg, apitest_runner::mock::MockOptions { port })?;
            Ok(0)
        }

        Commands::Generate { spec, output } => {
            let target = generate::generate_from_file(&spec, output.as_deref())?;
            println!("Generated {target}");
            Ok(0)
        }

        Commands::GhaInit { path } => {
            let target = gha::write_workflow(path.as_deref().unwrap_or(""))?;
            println!("Generated {}", target.display());
            Ok(0)
        }

        Commands::Schema => {
            let schema = schemars::schema_for!(RunReport);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(0)
        }
    }
}

fn print_summary(data: &RunReport) {
    for file in &data.files {
        println!("\n{} ({} ms)", file.file, file.duration_ms);
        for test in &file.tests {
            let label = match test.status {
                TestStatus::Pass => "PASS",
                TestStatus::Fail => "FAIL",
                TestStatus::Skip => "SKIP",
                TestStatus::Flaky => "FLAKY",
            };
            print!("  [{label}] {} ({} {})", test.name, test.method, test.path);
            if !test.message.is_empty() && test.message != "ok" {
                print!(" - {}", test.message);
            }
            println!();
        }
    }

    println!(
        "\nSummary: total={} pass={} fail={} skip={} duration={}ms",
        data.total, data.passed, data.failed, data.skipped, data.duration_ms
    );
    if !data.flaky.is_empty() {
        println!("Flaky tests: {}", data.flaky.join(", "));
    }
    if let Some(load) = &data.load {
        println!(
            "Load: {} {} users={} requests={} success={} fail={} avg={:.2}ms p95={:.2}ms",
            load.method,
            load.path,
            load.users,
            load.requests,
            load.successes,
            load.failures,
            load.avg_ms,
            load.p95_ms
        );
    }
}
