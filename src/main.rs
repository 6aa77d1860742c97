use clap::Parser;
use kubevibe::adapters::{
    GenerationService, HttpGenerationClient, PortFuture, ShellToolRunner, TcpPortProbe,
};
use kubevibe::config::{run_stamp, FixResumePolicy, IntentMethod, RunConfig, ValidationMethod};
use kubevibe::error::get_error_info;
use kubevibe::intent::{
    ClarificationSource, FewShotBank, IntentLoop, IntentOptions, IntentResolution,
};
use kubevibe::pipeline::{write_graph, HaltSignal, Pipeline, PipelineOptions, RunReport};
use kubevibe::runlog::{context, RunLog, RUN_LOG_FILE};
use kubevibe::stages::{Collaborators, RunContext, StaticArtifactValidator};
use kubevibe::{Result, VibeError};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "kubevibe")]
#[command(about = "Turn a service request into a built, deployed and charted Kubernetes service")]
#[command(version)]
struct Cli {
    /// The service request, in plain words
    #[arg(required = true)]
    prompt: Vec<String>,

    /// Path to config file (default: .kubevibe/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Generation model (overrides MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Intent curation method (overrides INTENT_METHOD)
    #[arg(long)]
    intent_method: Option<String>,

    /// Intent validation method (overrides IVAL_METHOD)
    #[arg(long)]
    validation_method: Option<String>,

    /// Where FIX resumes: build, generate or failed-stage (overrides FIX_RESUME)
    #[arg(long)]
    fix_resume: Option<String>,

    /// Wall-clock budget in seconds (overrides TIMEOUT)
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum stage executions (overrides N)
    #[arg(short = 'n', long)]
    max_iterations: Option<u32>,

    /// Let the judge ask clarification questions on stdin
    #[arg(long)]
    interactive: bool,

    /// Render the transition graph after the run
    #[arg(long)]
    graph: bool,
}

impl Cli {
    fn apply(&self, mut config: RunConfig) -> Result<RunConfig> {
        if let Some(model) = &self.model {
            config.model.clone_from(model);
        }
        if let Some(method) = &self.intent_method {
            config.intent_method = IntentMethod::parse(method)?;
        }
        if let Some(method) = &self.validation_method {
            config.validation_method = ValidationMethod::parse(method)?;
        }
        if let Some(policy) = &self.fix_resume {
            config.fix_resume = FixResumePolicy::parse(policy)?;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(max) = self.max_iterations {
            config.max_iterations = Some(max);
        }
        if self.interactive {
            config.hands_free = false;
        }
        if self.graph {
            config.graph = true;
        }
        Ok(config)
    }

    fn request(&self) -> Result<String> {
        let request = self.prompt.join(" ");
        if request.trim().is_empty() {
            return Err(VibeError::Config("the service request is empty".to_string()));
        }
        Ok(request)
    }
}

/// Operator answers read from standard input.
struct StdinClarifications {
    lines: Lines<BufReader<Stdin>>,
}

impl StdinClarifications {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl ClarificationSource for StdinClarifications {
    fn answer<'a>(&'a mut self, question: &'a str) -> PortFuture<'a, String> {
        Box::pin(async move {
            println!("\nClarification question: {question}");
            print!("> ");
            std::io::stdout().flush()?;
            match self.lines.next_line().await? {
                Some(line) => Ok(line.trim().to_string()),
                None => Err(VibeError::Internal(
                    "stdin closed before the question was answered".to_string(),
                )),
            }
        })
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let run_id = Uuid::new_v4();
    let code = match run(&cli).instrument(info_span!("run", %run_id)).await {
        Ok(code) => code,
        Err(err) => {
            error!(code = err.code(), "{err}");
            eprintln!("Error [{}]: {err}", err.code());
            if let Some((_, fix)) = get_error_info(err.code()) {
                eprintln!("Hint: {fix}");
            }
            err.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32> {
    let config = cli.apply(RunConfig::load(cli.config.clone()).await?)?;
    let request = cli.request()?;

    let started = chrono::Local::now();
    let run_dir = config.run_dir(started);
    tokio::fs::create_dir_all(&run_dir).await?;
    let log = RunLog::create(run_dir.join(RUN_LOG_FILE)).await?;
    println!("{}", config.summary());
    log.append(context::CONTROL, &config.summary()).await?;
    info!(run_dir = %run_dir.display(), "run started");

    let generation: Arc<dyn GenerationService> =
        Arc::new(HttpGenerationClient::new(&config.llm_url, config.model.clone())?);

    let mut intent_loop = IntentLoop::new(
        request,
        IntentOptions::from(&config),
        Arc::clone(&generation),
        FewShotBank::new(config.fewshot_bank.clone(), config.fewshot_deployments.clone()),
        log.clone(),
    );
    let intent_report = intent_loop
        .run_to_completion(&mut StdinClarifications::new())
        .await?;
    let intent = match intent_report.resolution {
        IntentResolution::Approved(text) => {
            let done = format!(
                "Intent extracted in {} seconds.",
                intent_report.elapsed.as_secs()
            );
            println!("{done}");
            log.append(context::CONTROL, &done).await?;
            text
        }
        IntentResolution::Exhausted => {
            let broken = format!(
                "Timeout without success after {} seconds and {} tries",
                intent_report.elapsed.as_secs(),
                intent_report.iterations
            );
            println!("{broken}");
            log.append(context::CONTROL, &broken).await?;
            return Ok(1);
        }
    };

    let collab = Collaborators {
        tools: Arc::new(ShellToolRunner::new(config.tool_timeout)),
        generation,
        probe: Arc::new(TcpPortProbe),
        validator: Arc::new(StaticArtifactValidator),
    };
    let ctx = RunContext {
        intent,
        model: config.model.clone(),
        run_dir: run_dir.clone(),
        image_repo: config.image_repo.clone(),
        settle_delay: config.settle_delay,
        log: log.clone(),
    };
    let options = PipelineOptions {
        resume_policy: config.fix_resume,
        timeout: config.timeout,
        max_iterations: config.max_iterations,
    };

    let halt = HaltSignal::new();
    let on_ctrl_c = halt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("halt requested; stopping after the current stage");
            on_ctrl_c.trigger();
        }
    });

    let report = Pipeline::new(ctx, collab.clone(), options)
        .with_halt(halt)
        .run()
        .await;
    print_report(&report);
    log.append(
        context::CONTROL,
        &format!(
            "Finished with {} after {} seconds and {} stages",
            report.status,
            report.elapsed.as_secs(),
            report.stages_run
        ),
    )
    .await?;

    if config.graph {
        let resume = config.fix_resume.resume_stage(None);
        if let Err(err) = write_graph(
            collab.tools.as_ref(),
            &run_dir,
            &run_stamp(started),
            &report.trace(),
            resume,
        )
        .await
        {
            warn!(error = %err, "transition graph not written");
        }
    }

    Ok(report.status.exit_code())
}

fn print_report(report: &RunReport) {
    println!("\n{}", report.status);
    println!(
        "Elapsed: {} s, stages run: {}",
        report.elapsed.as_secs(),
        report.stages_run
    );
    for entry in report.trace() {
        println!("  {entry}");
    }
    match &report.endpoint {
        Some(endpoint) => println!("Endpoint: {endpoint}"),
        None => println!("Endpoint: none"),
    }
    match &report.chart {
        Some(chart) => println!("Chart: {}", chart.display()),
        None => println!("Chart: none"),
    }
}
