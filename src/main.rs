use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use quarry::config::{init_workspace, Config, SanityDefaults};
use quarry::db::{ColumnSearch, Match, ReadOptions, Source, DEFAULT_PEEK_ROWS};
use quarry::frame::{ExportFormat, Frame};
use quarry::report::{PostSelection, Report};
use quarry::task::{output_path, run_task};
use quarry::template::{Params, SqlEngine, SqlOptions};
use quarry::xquery::{Columns, Query, XQuery, XQueryOptions};

/// Parameterized SQL templates, post-hoc filtering and markdown reports for PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config directory (defaults to $QUARRY_CONFIG_DIR, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the queries/output/data folders
    Init {
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Render a SQL template without running it
    Render {
        /// Template name (e.g. `reference/table`) or inline SQL
        query: String,
        /// Template parameter as key=value; values are parsed as JSON when possible
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
        /// List the variables the template expects instead of rendering it
        #[arg(long)]
        vars: bool,
    },
    /// Run a query against a configured source
    Run {
        source: String,
        query: String,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
        /// Print in this format instead of a markdown table
        #[arg(short, long)]
        format: Option<ExportFormat>,
        /// Write the result to a file (format from the extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Text columns to convert to timestamps
        #[arg(long)]
        parse_dates: Vec<String>,
        /// Columns to use as the row index
        #[arg(long)]
        index_col: Vec<String>,
    },
    /// Execute a task file and write the result for the waiting client
    Task {
        source: String,
        task: PathBuf,
        /// Result file (defaults to output/temp/temp.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Search the catalog for tables
    FindTable {
        source: String,
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long, value_enum, default_value_t = Match::Like)]
        how: Match,
    },
    /// Search the catalog for columns
    FindColumn {
        source: String,
        #[arg(required = true)]
        patterns: Vec<String>,
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        data_type: Option<String>,
        #[arg(long, value_enum, default_value_t = Match::Like)]
        how: Match,
    },
    /// Show the first rows of a table
    Peek {
        source: String,
        table: String,
        #[arg(short, default_value_t = DEFAULT_PEEK_ROWS)]
        n: usize,
    },
    /// Check how recently a table was mutated
    Sanity {
        source: String,
        #[arg(long)]
        table: Option<String>,
        #[arg(long)]
        mutation_date_column: Option<String>,
        #[arg(long)]
        threshold_in_hours: Option<i64>,
    },
    /// Filter a JSON records file with the query language
    Filter {
        input: PathBuf,
        #[arg(required = true)]
        queries: Vec<String>,
        /// Apply every query to the input and stack the results
        #[arg(long)]
        parallel: bool,
        /// With --parallel, add a column naming the query each row came from
        #[arg(long)]
        store_keys: bool,
        /// Keep only these columns
        #[arg(long)]
        columns: Vec<String>,
        #[arg(short, long)]
        format: Option<ExportFormat>,
        /// Print the row counts after each step
        #[arg(long)]
        history: bool,
    },
    /// Render a markdown report template to HTML or DOCX
    Report {
        markdown: String,
        #[arg(short, long)]
        layout: Option<String>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, value_enum, default_value_t = ReportFormat::Html)]
        format: ReportFormat,
        /// Extra template folders searched before the configured ones
        #[arg(long)]
        templates: Vec<PathBuf>,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Html,
    Docx,
}

fn parse_param(arg: &str) -> Result<(String, serde_json::Value)> {
    let Some((key, value)) = arg.split_once('=') else {
        bail!("Expected key=value, got '{}'", arg);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty parameter name in '{}'", arg);
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn to_params(pairs: Vec<(String, serde_json::Value)>) -> Params {
    pairs.into_iter().collect()
}

fn print_frame(frame: &Frame, format: Option<ExportFormat>, config: &Config) {
    let format = format.unwrap_or(ExportFormat::Markdown);
    println!("{}", frame.export(format, &config.report.styler));
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(dir) => Config::load_from(dir)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Init { dir } => {
            init_workspace(&dir)?;
            println!("Initialized workspace in {}", dir.display());
        }
        Command::Render { query, params, vars } => {
            let engine = SqlEngine::from_config(&config)?;
            if vars {
                for name in engine.undeclared_variables(&query)? {
                    println!("{}", name);
                }
            } else {
                let sql = engine.get_sql(query.as_str(), &to_params(params), &SqlOptions::default())?;
                println!("{}", sql);
            }
        }
        Command::Run {
            source,
            query,
            params,
            format,
            output,
            parse_dates,
            index_col,
        } => {
            let source = Source::connect(&config, &source).await?;
            let options = ReadOptions {
                parse_dates,
                index_col,
                ..ReadOptions::unsqueezed()
            };
            let frame = source
                .execute(query.as_str(), to_params(params), &options)
                .await?
                .into_frame();
            match output {
                Some(path) => {
                    frame.write(&path)?;
                    println!("Wrote {} rows to {}", frame.height(), path.display());
                }
                None => print_frame(&frame, format, &config),
            }
        }
        Command::Task { source, task, output } => {
            let source = Source::connect(&config, &source).await?;
            let output = output.unwrap_or_else(|| output_path(&config));
            run_task(&source, &task, &output).await?;
        }
        Command::FindTable { source, patterns, how } => {
            let source = Source::connect(&config, &source).await?;
            let frame = source.find_table(&patterns[..], vec![], how).await?;
            print_frame(&frame, None, &config);
        }
        Command::FindColumn {
            source,
            patterns,
            table,
            data_type,
            how,
        } => {
            let source = Source::connect(&config, &source).await?;
            let search = ColumnSearch {
                table,
                data_type,
                how,
                ..ColumnSearch::new(&patterns[..])
            };
            let frame = source.find_column(&search).await?;
            print_frame(&frame, None, &config);
        }
        Command::Peek { source, table, n } => {
            let source = Source::connect(&config, &source).await?;
            let frame = source.peek(&table, n).await?;
            print_frame(&frame, None, &config);
        }
        Command::Sanity {
            source,
            table,
            mutation_date_column,
            threshold_in_hours,
        } => {
            let source = Source::connect(&config, &source).await?;
            let overrides = SanityDefaults {
                mutation_date_column,
                table,
                threshold_in_hours,
            };
            let report = source.sanity(&overrides).await?;
            print_frame(&report.to_frame(), None, &config);
        }
        Command::Filter {
            input,
            queries,
            parallel,
            store_keys,
            columns,
            format,
            history,
        } => {
            let frame = Frame::read_json(&input)?;
            let queries: Vec<Query> = queries.into_iter().map(Query::Text).collect();
            let options = XQueryOptions {
                columns: (!columns.is_empty()).then_some(Columns::Names(columns)),
                parallel,
                store_keys,
            };
            let mut xquery = XQuery::new();
            let result = xquery
                .run(&frame, &queries, &options)
                .with_context(|| format!("Failed to filter {}", input.display()))?;
            print_frame(&result, format, &config);
            if history {
                print_frame(&xquery.history_frame(), None, &config);
            }
        }
        Command::Report {
            markdown,
            layout,
            output,
            format,
            templates,
            params,
        } => {
            let report = Report::from_config(&config, Some(&markdown), layout.as_deref(), templates)?;
            let params = to_params(params);
            match format {
                ReportFormat::Html => {
                    report.to_html(&output, None, None, &PostSelection::Configured, &params)?
                }
                ReportFormat::Docx => {
                    report.to_docx(&output, None, None, &PostSelection::Configured, &params)?
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_json_and_text() {
        assert_eq!(parse_param("n=5").unwrap(), ("n".into(), serde_json::json!(5)));
        assert_eq!(
            parse_param("cols=[\"a\",\"b\"]").unwrap(),
            ("cols".into(), serde_json::json!(["a", "b"]))
        );
        assert_eq!(
            parse_param("table=students").unwrap(),
            ("table".into(), serde_json::json!("students"))
        );
        assert_eq!(parse_param("eq=a=b").unwrap().1, serde_json::json!("a=b"));
    }

    #[test]
    fn test_parse_param_rejects_missing_value() {
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_cli_parses_filter() {
        let cli = Cli::try_parse_from([
            "quarry", "filter", "data.json", "id > 1", "name contains 'o'", "--parallel",
        ])
        .unwrap();
        match cli.command {
            Command::Filter { queries, parallel, .. } => {
                assert_eq!(queries.len(), 2);
                assert!(parallel);
            }
            _ => panic!("Expected filter"),
        }
    }
}
