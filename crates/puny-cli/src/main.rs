use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use puny::template::{Action, CompileCache, Template};
use puny::{Component, ScopeChain, Timer, compile};
use puny_scene::{Document, Event};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

const DEFAULT_PAGE: &str = r#"<div id="app"></div>"#;

/// How often `render` looks for a finished debounce.
const SETTLE_POLL: Duration = Duration::from_millis(1);

#[derive(Parser)]
#[command(name = "puny")]
#[command(about = "Puny template engine CLI")]
struct Cli {
    /// Log engine activity at debug level (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a single expression
    Eval {
        /// The expression to evaluate
        expression: String,
        /// Variables as a JSON object (use @filename to read from file)
        #[arg(long)]
        scope: Option<String>,
        /// Print the grouping the parser settled on before the value
        #[arg(long)]
        explain: bool,
    },
    /// Check that template files compile
    Check {
        /// Template files
        files: Vec<PathBuf>,
    },
    /// Render a template and print the resulting markup
    Render {
        /// Template file
        file: PathBuf,
        /// Component data as a JSON object (use @filename to read from file)
        #[arg(long)]
        data: Option<String>,
        /// Page markup the component mounts into (use @filename to read from file)
        #[arg(long, default_value = DEFAULT_PAGE)]
        page: String,
        /// Selector of the mount node inside the page
        #[arg(long, default_value = "#app")]
        mount: String,
        /// Write a data field after the first render
        #[arg(long = "set", value_name = "FIELD=JSON")]
        sets: Vec<String>,
        /// Dispatch an event after the writes, in order
        #[arg(long = "dispatch", value_name = "SELECTOR@EVENT")]
        dispatches: Vec<String>,
        /// Register a method that prints its arguments to stderr
        #[arg(long = "method", value_name = "NAME")]
        methods: Vec<String>,
        /// Debounce interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
        /// Print a JSON snapshot instead of markup
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Commands::Eval {
            expression,
            scope,
            explain,
        } => {
            let scope = match scope {
                Some(scope) => parse_object(&read_argument(&scope)?).context("--scope")?,
                None => Map::new(),
            };
            match evaluate(&expression, &scope) {
                Ok((grouping, value)) => {
                    if explain {
                        println!("{grouping}");
                    }
                    println!("{value}");
                }
                Err(error) => {
                    eprint!("{}", error.report("<expression>"));
                    std::process::exit(1);
                }
            }
        }
        Commands::Check { files } => {
            let mut failed = 0;
            for file in &files {
                let source = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
                match check_template(&source) {
                    Ok(summary) => {
                        println!("{}: ok ({summary})", file.display());
                        if summary.roots != 1 {
                            eprintln!(
                                "{}: warning: {} top-level elements, a component renders exactly one",
                                file.display(),
                                summary.roots
                            );
                        }
                    }
                    Err(error) => {
                        eprint!("{}", error.report(&file.display().to_string()));
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                eprintln!("\n{} of {} templates failed", failed, files.len());
                std::process::exit(1);
            }
        }
        Commands::Render {
            file,
            data,
            page,
            mount,
            sets,
            dispatches,
            methods,
            interval,
            json,
        } => {
            let options = RenderOptions {
                template: fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?,
                filename: file.display().to_string(),
                data: match data {
                    Some(data) => Value::Object(parse_object(&read_argument(&data)?).context("--data")?),
                    None => Value::Null,
                },
                page: read_argument(&page)?,
                mount,
                sets: sets.iter().map(|set| parse_assignment(set)).collect::<Result<_>>()?,
                dispatches: dispatches.iter().map(|dispatch| parse_dispatch(dispatch)).collect::<Result<_>>()?,
                methods,
                interval: interval.map(Duration::from_millis),
                json,
            };

            let runtime = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
            let local = tokio::task::LocalSet::new();
            match local.block_on(&runtime, render(&options)) {
                Ok(output) => println!("{output}"),
                Err(error) => {
                    eprintln!("{error:#}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Timer backed by the tokio runtime; callbacks run on the current `LocalSet`.
struct TokioTimer;

impl Timer for TokioTimer {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

/// Compiles and evaluates `source`, returning its grouping and value.
fn evaluate(source: &str, scope: &Map<String, Value>) -> Result<(String, Value), puny::Error> {
    let expression = compile(source)?;
    let value = expression.eval(&ScopeChain::new(), scope)?;
    Ok((expression.root().to_string(), value))
}

struct CheckSummary {
    roots: usize,
    expressions: usize,
    mappings: usize,
    methods: Vec<String>,
}

impl std::fmt::Display for CheckSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} expressions, {} mappings", self.expressions, self.mappings)?;
        if !self.methods.is_empty() {
            write!(f, ", calls {}", self.methods.join(", "))?;
        }
        Ok(())
    }
}

fn check_template(source: &str) -> Result<CheckSummary, puny::Error> {
    let mut cache = CompileCache::new();
    let template = Template::compile(source, &mut cache)?;
    let mut methods = Vec::new();
    for action in template.actions() {
        if let Action::Invoke { method, .. } = action {
            if !methods.contains(method) {
                methods.push(method.clone());
            }
        }
    }
    Ok(CheckSummary {
        roots: template.roots.len(),
        expressions: cache.expression_count(),
        mappings: cache.mapping_count(),
        methods,
    })
}

struct RenderOptions {
    template: String,
    filename: String,
    data: Value,
    page: String,
    mount: String,
    sets: Vec<(String, Value)>,
    dispatches: Vec<(String, String)>,
    methods: Vec<String>,
    interval: Option<Duration>,
    json: bool,
}

/// Mounts the template, applies writes and events, and serializes the result
/// once every pending render has run. Must be polled inside a `LocalSet`.
async fn render(options: &RenderOptions) -> Result<String> {
    let document = Document::parse(&options.page).map_err(|error| anyhow!(error.report("<page>")))?;

    let mut builder = Component::builder(&document, options.mount.as_str(), Rc::new(TokioTimer))
        .name(options.filename.clone())
        .template(options.template.clone())
        .data(options.data.clone());
    for name in &options.methods {
        let label = name.clone();
        builder = builder.method(name.clone(), move |_, arguments| {
            let arguments: Vec<String> = arguments.iter().map(Value::to_string).collect();
            eprintln!("{label}({})", arguments.join(", "));
            Ok(())
        });
    }
    if let Some(interval) = options.interval {
        builder = builder.interval(interval);
    }
    let component = builder.build().map_err(|error| anyhow!(error.report(&options.filename)))?;

    for (field, value) in &options.sets {
        if !component.set(field, value.clone())? {
            log::info!("{field} already holds {value}");
        }
    }
    settle(&component).await?;

    for (selector, event) in &options.dispatches {
        let node = document
            .query_selector(selector)
            .with_context(|| format!("no node matches `{selector}`"))?;
        let reached = document
            .dispatch_event(node, Event::new(event.as_str()))
            .map_err(|error| anyhow!("{event} on `{selector}` failed: {error}"))?;
        log::debug!("{event} on `{selector}` reached {reached} listener(s)");
        settle(&component).await?;
    }

    if options.json {
        let snapshot = document
            .snapshot(component.root())
            .context("rendered root left the document")?;
        Ok(serde_json::to_string_pretty(&snapshot)?)
    } else {
        Ok(document.outer_html(component.root()))
    }
}

/// Waits out the debounce, surfacing a failed background render.
async fn settle(component: &Component) -> Result<()> {
    while component.is_render_pending() {
        tokio::time::sleep(SETTLE_POLL).await;
    }
    match component.take_error() {
        Some(error) => Err(anyhow!(error.report(component.name()))),
        None => Ok(()),
    }
}

/// `@path` reads the file, anything else is taken literally.
fn read_argument(argument: &str) -> Result<String> {
    match argument.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading {path}")),
        None => Ok(argument.to_string()),
    }
}

fn parse_object(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(text)? {
        Value::Object(map) => Ok(map),
        other => bail!("expected a JSON object, got {other}"),
    }
}

/// `field=json`; a value that is not valid JSON is taken as a string.
fn parse_assignment(text: &str) -> Result<(String, Value)> {
    let (field, raw) = text
        .split_once('=')
        .with_context(|| format!("`{text}` is not FIELD=JSON"))?;
    if field.is_empty() {
        bail!("`{text}` names no field");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}

/// `selector@event`, split at the last `@` so selectors may contain one.
fn parse_dispatch(text: &str) -> Result<(String, String)> {
    match text.rsplit_once('@') {
        Some((selector, event)) if !selector.is_empty() && !event.is_empty() => {
            Ok((selector.to_string(), event.to_string()))
        }
        _ => bail!("`{text}` is not SELECTOR@EVENT"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(template: &str, data: Value) -> RenderOptions {
        RenderOptions {
            template: template.to_string(),
            filename: "test.html".to_string(),
            data,
            page: DEFAULT_PAGE.to_string(),
            mount: "#app".to_string(),
            sets: Vec::new(),
            dispatches: Vec::new(),
            methods: Vec::new(),
            interval: None,
            json: false,
        }
    }

    #[test]
    fn eval_reports_grouping_and_value() {
        let scope = parse_object(r#"{"a": true, "b": false, "c": true}"#).unwrap();
        let (grouping, value) = evaluate("a && b || c", &scope).unwrap();
        assert_eq!(grouping, "((a && b) || c)");
        assert_eq!(value, json!(true));
    }

    #[test]
    fn eval_surfaces_compile_errors() {
        let error = evaluate("(1 + 2", &Map::new()).unwrap_err();
        assert!(matches!(error, puny::Error::Compile(_)));
    }

    #[test]
    fn check_lists_invoked_methods_once() {
        let summary = check_template(
            r#"<ul><li v-for="w in words" @click="pick(w); pick(w, $event)" v-bind:class="{on: w === current}">{{ w }}</li></ul>"#,
        )
        .unwrap();
        assert_eq!(summary.roots, 1);
        assert_eq!(summary.methods, vec!["pick".to_string()]);
        assert_eq!(summary.mappings, 1);
    }

    #[test]
    fn check_rejects_unknown_bindings() {
        assert!(check_template(r#"<p v-bind:title="x">a</p>"#).is_err());
    }

    #[test]
    fn assignments_fall_back_to_strings() {
        assert_eq!(parse_assignment("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(parse_assignment("word=ink").unwrap(), ("word".to_string(), json!("ink")));
        assert_eq!(parse_assignment("pair=[1,2]").unwrap(), ("pair".to_string(), json!([1, 2])));
        assert!(parse_assignment("=1").is_err());
        assert!(parse_assignment("word").is_err());
    }

    #[test]
    fn dispatch_splits_at_last_at_sign() {
        assert_eq!(
            parse_dispatch("button@click").unwrap(),
            ("button".to_string(), "click".to_string())
        );
        assert_eq!(
            parse_dispatch(".@@hidden@click").unwrap(),
            (".@@hidden".to_string(), "click".to_string())
        );
        assert!(parse_dispatch("button@").is_err());
        assert!(parse_dispatch("click").is_err());
    }

    #[tokio::test]
    async fn render_applies_writes_after_the_debounce() {
        let mut options = options("<p>{{ word }}</p>", json!({"word": "pen"}));
        options.sets.push(("word".to_string(), json!("ink")));
        let output = tokio::task::LocalSet::new().run_until(render(&options)).await.unwrap();
        assert_eq!(output, "<p>ink</p>");
    }

    #[tokio::test]
    async fn render_dispatches_events_in_order() {
        let mut options = options(
            r#"<div><p>{{ count }}</p><button @click="count = count + 1">more</button></div>"#,
            json!({"count": 0}),
        );
        options.dispatches.push(("button".to_string(), "click".to_string()));
        options.dispatches.push(("button".to_string(), "click".to_string()));
        let output = tokio::task::LocalSet::new().run_until(render(&options)).await.unwrap();
        assert_eq!(output, "<div><p>2</p><button>more</button></div>");
    }

    #[tokio::test]
    async fn render_fails_on_missing_methods() {
        let options = options(r#"<button @click="save()">save</button>"#, Value::Null);
        let error = tokio::task::LocalSet::new().run_until(render(&options)).await.unwrap_err();
        assert!(error.to_string().contains("save"), "{error}");
    }

    #[tokio::test]
    async fn render_snapshots_as_json() {
        let mut options = options(r#"<p v-bind:class="{on: on}">x</p>"#, json!({"on": true}));
        options.json = true;
        let output = tokio::task::LocalSet::new().run_until(render(&options)).await.unwrap();
        let snapshot: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(snapshot["kind"], json!("element"));
        assert_eq!(snapshot["classes"], json!(["on"]));
    }
}
