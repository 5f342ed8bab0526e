mod commands;
mod terminal;

use commands::CommandLine;
use futures::StreamExt;
use rcat_common::config::{ConnectionSpec, Mode};
use rcat_common::error::Error;
use rcat_core::{Engine, ExecSource, LocalIoSource, StdioSource};
use terminal::{logging, print};
use tracing::{debug, error};

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let commands = CommandLine::parse_args();

    logging::init(commands.verbose);

    let code = match run(&commands).await {
        Ok(code) => code,
        Err(err) => exit_code(&err),
    };

    // A blocked stdin read would otherwise keep the runtime from shutting down.
    std::process::exit(code)
}

async fn run(commands: &CommandLine) -> anyhow::Result<i32> {
    let spec = commands.to_spec()?;
    let engine = Engine::new(spec)?;

    let cancel = engine.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted");
            cancel.cancel();
        }
    });

    match engine.spec().mode {
        Mode::Scan => scan(&engine).await,
        Mode::Connect | Mode::Listen => {
            let mut local = local_source(engine.spec());
            let outcome = engine.run(local.as_mut()).await?;
            debug!("{outcome:?}");
            Ok(EXIT_OK)
        }
    }
}

/// Exit status is success when at least one port answered.
async fn scan(engine: &Engine) -> anyhow::Result<i32> {
    let host = engine.spec().destination.host.clone().unwrap_or_default();
    let transport = engine.spec().transport;
    let numeric = engine.spec().numeric;

    let mut results = engine.scan().await?;
    let (mut open, mut total) = (0usize, 0usize);

    while let Some(result) = results.next().await {
        print::scan_result(&host, transport, numeric, &result);
        total += 1;
        if result.is_open() {
            open += 1;
        }
    }

    if engine.cancellation().is_cancelled() {
        return Err(Error::Cancelled.into());
    }

    print::scan_summary(open, total);
    Ok(if open > 0 { EXIT_OK } else { EXIT_FAILURE })
}

fn local_source(spec: &ConnectionSpec) -> Box<dyn LocalIoSource> {
    match &spec.exec {
        Some(exec) => Box::new(ExecSource(exec.clone())),
        None => Box::new(StdioSource),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(Error::Cancelled) => EXIT_INTERRUPTED,
        _ => {
            error!("{err:#}");
            EXIT_FAILURE
        }
    }
}
