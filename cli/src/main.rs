use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::OpenOptions;
use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use apiprobe_core::modules::InjectionTester;
use apiprobe_core::{
    parse_custom_headers, read_lines, HttpClient, PayloadCatalog, ProbeConfig, ProbeExecutor,
    ScanContext, ScanEventSink, ScanSummary, SinkRef, ConsoleSink, TestResult, TesterRegistry,
    VulnerabilityType,
};

#[derive(Parser, Debug)]
#[command(
    name = "apiprobe",
    version,
    about = "HTTP API vulnerability prober",
    override_usage = "apiprobe <target> <options>",
    after_help = "\x1b[1;36mEXAMPLES:\x1b[0m
  Full run:                       apiprobe https://api.example.com/v1/login
  Rate limiting only:             apiprobe https://api.example.com/v1/login --only rate-limit
  Authenticated target:           apiprobe https://api.example.com/me -H \"Authorization: Bearer TOKEN\"
  Through Burp:                   apiprobe https://api.example.com --proxy http://127.0.0.1:8080
  Gentler bursts:                 apiprobe https://api.example.com -t 2 --delay-ms 200
  From a config file:             apiprobe --config probe.json -o findings.jsonl
  Targets from a file:            apiprobe -i targets.txt --dry-run"
)]
pub struct Args {
    #[arg(required_unless_present_any = ["list", "config", "input"])]
    pub target: Option<String>,

    #[arg(short = 'i', long, help = "File containing target URLs (one per line)")]
    pub input: Option<String>,

    #[arg(long, help = "JSON config file (target fields plus a \"policy\" object)")]
    pub config: Option<String>,

    #[arg(short = 'H', long = "header", help = "Custom header (e.g. \"Authorization: Bearer TOKEN\")")]
    pub headers: Vec<String>,

    #[arg(short = 'X', long, help = "HTTP method for the base request")]
    pub method: Option<String>,

    #[arg(short = 'd', long, help = "Request body for the base request")]
    pub data: Option<String>,

    #[arg(short = 't', long, help = "Concurrent probes per burst")]
    pub threads: Option<usize>,

    #[arg(long, help = "Request timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Proxy URL (e.g. http://127.0.0.1:8080)")]
    pub proxy: Option<String>,

    #[arg(long, help = "Comma-separated tester tags to run (see --list)")]
    pub only: Option<String>,

    #[arg(long, help = "Probes in the rate-limit calibration burst")]
    pub calibration_count: Option<usize>,

    #[arg(long, help = "Probes per bypass technique")]
    pub bypass_count: Option<usize>,

    #[arg(long, help = "Success ratio a bypass must exceed (0.0 - 1.0)")]
    pub threshold: Option<f64>,

    #[arg(long, help = "Delay after each probe, in milliseconds")]
    pub delay_ms: Option<u64>,

    #[arg(short = 'p', long, help = "Add injection payloads from a file")]
    pub payloads: Option<String>,

    #[arg(short = 'o', long, help = "Append findings to this file as JSON lines")]
    pub output: Option<String>,

    #[arg(short = 'v', long, default_value_t = false, help = "Debug logging and full finding details")]
    pub verbose: bool,

    #[arg(long, help = "List available testers and exit")]
    pub list: bool,

    #[arg(long, help = "Print what would be probed without sending requests")]
    pub dry_run: bool,
}

#[tokio::main]
async fn main() {
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let args = Args::parse();

    let default_filter = if args.verbose { "apiprobe_core=debug" } else { "apiprobe_core=warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("{}", format!("[!] {:#}", e).red());
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.list {
        print_testers();
        return Ok(());
    }

    print_banner();

    let mut config = match &args.config {
        Some(path) => ProbeConfig::load(path).with_context(|| format!("failed to load config '{}'", path))?,
        None => ProbeConfig::default(),
    };
    apply_overrides(&mut config, &args);

    let targets = collect_targets(&args, &config)?;
    if args.dry_run {
        for target in &targets {
            println!("[DRY RUN] Would probe target: {}", target);
        }
        return Ok(());
    }

    let only = parse_only(args.only.as_deref())?;
    let sink = ConsoleSink::new_ref(args.verbose);
    let executor: Arc<dyn ProbeExecutor> = Arc::new(
        HttpClient::new(config.target.timeout_secs, config.target.proxy.as_deref(), &[])
            .context("failed to build HTTP client")?,
    );

    let mut registry = TesterRegistry::with_default_testers(Arc::clone(&executor), config.policy.clone());
    if let Some(path) = &args.payloads {
        let mut catalog = PayloadCatalog::builtin();
        let added = catalog
            .extend_from_file(path)
            .with_context(|| format!("failed to read payloads '{}'", path))?;
        sink.on_log("success", &format!("[+] Loaded {} custom payload(s) from {}", added, path));
        registry.register(Arc::new(InjectionTester::new(Arc::clone(&executor), catalog)));
    }
    if let Some(only) = &only {
        registry.retain(|k| only.contains(&k));
    }
    if registry.is_empty() {
        bail!("no testers selected");
    }

    let (ctx, cancel) = ScanContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let total = targets.len();
    for (i, base_url) in targets.into_iter().enumerate() {
        if total > 1 {
            sink.on_log("phase", &format!("\n━━━ Target {}/{}: {} ━━━", i + 1, total, base_url));
        }
        let mut target = config.target.clone();
        target.base_url = base_url;

        print_probe_config(&target.base_url, &config, &registry);
        probe_target(&ctx, &registry, &target, &sink, args.output.as_deref()).await?;

        if ctx.is_cancelled() {
            sink.on_log("warn", "[!] Interrupted, remaining targets skipped.");
            break;
        }
    }

    Ok(())
}

/// CLI flags win over the config file.
fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    let target = &mut config.target;
    target.headers.extend(parse_custom_headers(&args.headers));
    if let Some(method) = &args.method {
        target.method = method.clone();
    }
    if let Some(data) = &args.data {
        target.body = Some(data.clone());
    }
    if let Some(timeout) = args.timeout {
        target.timeout_secs = timeout;
    }
    if let Some(proxy) = &args.proxy {
        target.proxy = Some(proxy.clone());
    }

    let policy = &mut config.policy;
    if let Some(threads) = args.threads {
        policy.calibration_concurrency = threads;
        policy.bypass_concurrency = threads;
    }
    if let Some(count) = args.calibration_count {
        policy.calibration_count = count;
    }
    if let Some(count) = args.bypass_count {
        policy.bypass_count = count;
    }
    if let Some(threshold) = args.threshold {
        policy.success_threshold = threshold;
    }
    if args.delay_ms.is_some() {
        policy.pacing_ms = args.delay_ms;
    }
}

fn collect_targets(args: &Args, config: &ProbeConfig) -> anyhow::Result<Vec<String>> {
    let mut targets = Vec::new();

    if let Some(path) = &args.input {
        let lines = read_lines(path).with_context(|| format!("failed to read '{}'", path))?;
        println!("{}", format!("[+] Loaded {} target(s) from {}", lines.len(), path).green().bold());
        targets.extend(lines);
    }
    if let Some(target) = &args.target {
        targets.push(target.clone());
    }
    if targets.is_empty() && !config.target.base_url.is_empty() {
        targets.push(config.target.base_url.clone());
    }
    if targets.is_empty() {
        bail!("no targets specified; pass a URL, -i <file> or a config with baseUrl");
    }
    Ok(targets)
}

fn parse_only(raw: Option<&str>) -> anyhow::Result<Option<Vec<VulnerabilityType>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let mut selected = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match VulnerabilityType::from_tag(tag) {
            Some(kind) => selected.push(kind),
            None => bail!("unknown tester tag '{}' (see --list)", tag),
        }
    }
    Ok(Some(selected))
}

async fn probe_target(
    ctx: &ScanContext,
    registry: &TesterRegistry,
    target: &apiprobe_core::TargetConfig,
    sink: &SinkRef,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Probing {} with {} tester(s)...", target.base_url, registry.len()));

    let outcome = registry.run_all(ctx, target).await;
    spinner.finish_and_clear();

    let (results, failure) = match outcome {
        Ok(results) => (results, None),
        Err(e) => {
            let message = e.to_string();
            let mut completed = e.completed;
            completed.push(TestResult::failed(e.tester, e.source));
            (completed, Some(message))
        }
    };

    for result in &results {
        sink.on_result(result);
    }
    if let Some(path) = output {
        write_findings(path, &results).with_context(|| format!("failed to write '{}'", path))?;
    }
    print_summary(&results);

    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

fn write_findings(path: &str, results: &[TestResult]) -> anyhow::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for finding in results.iter().flat_map(|r| r.findings()) {
        writeln!(file, "{}", serde_json::to_string(finding)?)?;
    }
    Ok(())
}

fn print_testers() {
    println!("{}", "Available testers:".bright_cyan().bold());
    let executor: Arc<dyn ProbeExecutor> = match HttpClient::new(1, None, &[]) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("{}", format!("[!] {}", e).red());
            return;
        }
    };
    let registry = TesterRegistry::with_default_testers(executor, Default::default());
    for tester in registry.all() {
        println!(
            "  {:<14} {}",
            tester.vuln_type().tag().green().bold(),
            tester.description()
        );
    }
}

fn print_banner() {
    let banner = r#"
     _    ____ ___ ____  ____   ___  ____  _____
    / \  |  _ \_ _|  _ \|  _ \ / _ \| __ )| ____|
   / _ \ | |_) | || |_) | |_) | | | |  _ \|  _|
  / ___ \|  __/| ||  __/|  _ <| |_| | |_) | |___
 /_/   \_\_|  |___|_|   |_| \_\\___/|____/|_____|
    "#;
    println!("{}", banner.bright_cyan().bold());
    println!("{}", "──────────────────────────────────────────────────".dimmed());
}

fn print_probe_config(target: &str, config: &ProbeConfig, registry: &TesterRegistry) {
    let policy = &config.policy;
    let testers: Vec<&str> = registry.categories().iter().map(|k| k.tag()).collect();

    println!("{}", format!("[+] Target:      {}", target).green().bold());
    println!("{}", format!("[+] Method:      {}", config.target.method).blue());
    println!("{}", format!("[+] Timeout:     {}s", config.target.timeout_secs).blue());
    println!("{}", format!("[+] Testers:     {}", testers.join(", ")).magenta().bold());
    println!(
        "{}",
        format!(
            "[+] Bursts:      {} calibration / {} per bypass @ {} concurrent",
            policy.calibration_count, policy.bypass_count, policy.bypass_concurrency
        )
        .blue()
    );
    println!("{}", format!("[+] Threshold:   > {:.0}%", policy.success_threshold * 100.0).blue());
    if let Some(delay) = policy.pacing() {
        println!("{}", format!("[+] Delay:       {}ms", delay.as_millis()).yellow());
    }
    if let Some(proxy) = &config.target.proxy {
        println!("{}", format!("[+] Proxy:       {}", proxy).yellow());
    }
    if !config.target.headers.is_empty() {
        println!("{}", format!("[+] Headers:     {} custom", config.target.headers.len()).yellow());
    }
    println!("{}", "──────────────────────────────────────────────────".dimmed());
}

fn print_summary(results: &[TestResult]) {
    let summary = ScanSummary::from_results(results);
    println!("\n{}", "Summary".bright_white().bold());
    println!("  Testers run:   {}", summary.testers);
    println!("  Inconclusive:  {}", summary.inconclusive);
    if summary.findings == 0 {
        println!("  Findings:      {}", "none".green());
        return;
    }
    println!("  Findings:      {}", summary.findings.to_string().red().bold());
    for (severity, count) in summary.by_severity.iter().rev() {
        println!("    {:<9} {}", severity.to_string(), count);
    }
}
