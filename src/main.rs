// src/main.rs - command line front end for translation and driver runs
use clap::{Parser, Subcommand, ValueEnum};
use printmgr_rs::config::{load_config, Config};
use printmgr_rs::printable::{sniff, DlpReader, DlpSink, FdmReader, FdmSink, ReadError};
use printmgr_rs::printers::{OctoprintPrinter, SerialPrinter, VirtualPrinter};
use printmgr_rs::{Asset, DriverEvent, PrinterCatalog, PrinterDriver, Translator, TranslatorFactory};
use printmgr_shared::{DlpHeader, DlpSlice, DriverState, FdmCommand, FdmHeader, PrintableKind};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Print manager CLI
#[derive(Parser, Debug)]
#[command(name = "printmgr", about = "Translate printables and drive 3D printers.")]
struct Cli {
    /// Path to a TOML config file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `[logging] level`
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a printable into a printer's native format
    Translate {
        #[arg(long)]
        printer_type: String,
        #[arg(long)]
        profile: Option<String>,
        #[arg(long)]
        material: Option<String>,
        input: PathBuf,
        output: PathBuf,
    },
    /// Report what a printable file contains
    Inspect { file: PathBuf },
    /// Load and print a file through a driver
    Print {
        #[arg(long, value_enum, default_value_t = DriverKind::Virtual)]
        driver: DriverKind,
        #[arg(long)]
        printer_type: Option<String>,
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DriverKind {
    Virtual,
    Serial,
    Octoprint,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(&path.to_string_lossy())?,
        None => Config::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    tracing_subscriber::fmt()
        .with_max_level(config.logging.max_level()?)
        .init();
    tracing::info!("Starting printmgr {}", env!("CARGO_PKG_VERSION"));

    let catalog = PrinterCatalog::from_config(&config)?;
    match cli.command {
        Commands::Translate {
            printer_type,
            profile,
            material,
            input,
            output,
        } => translate(&config, &catalog, &printer_type, profile, material, input, output).await,
        Commands::Inspect { file } => inspect(&config, file).await,
        Commands::Print {
            driver,
            printer_type,
            file,
        } => print(&config, &catalog, driver, printer_type, file).await,
    }
}

async fn translate(
    config: &Config,
    catalog: &PrinterCatalog,
    printer_type_id: &str,
    profile_id: Option<String>,
    material_id: Option<String>,
    input: PathBuf,
    output: PathBuf,
) -> Result<(), BoxError> {
    let printer_type = catalog.printer_type(printer_type_id)?;
    let profile = catalog.profile_for(printer_type, profile_id.as_deref());
    let material = material_id.map(|id| catalog.material(&id)).transpose()?;

    let factory = TranslatorFactory::with_builtin_translators(config.translator_options());
    let Some(mut translator) = factory.get(printer_type, profile, material) else {
        return Err(format!("No translator for printer type {}", printer_type.id).into());
    };
    let mut progress = translator.progress().subscribe();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            tracing::debug!("Translation progress {:.2}", *progress.borrow());
        }
    });
    let result = translator.translate(&input, &output).await;
    watcher.abort();
    result?;
    tracing::info!("Wrote {}", output.display());
    Ok(())
}

/// Counts what a reader delivers.
#[derive(Default)]
struct Census {
    commands: usize,
    slices: usize,
}

#[async_trait::async_trait]
impl FdmSink for Census {
    type Error = ReadError;

    async fn on_header(&mut self, header: &FdmHeader) -> Result<(), ReadError> {
        tracing::info!("FDM header: {:?}", header);
        Ok(())
    }

    async fn on_command(&mut self, _command: FdmCommand) -> Result<(), ReadError> {
        self.commands += 1;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DlpSink for Census {
    type Error = ReadError;

    async fn on_header(&mut self, header: &DlpHeader) -> Result<(), ReadError> {
        tracing::info!("DLP header: {:?}", header);
        Ok(())
    }

    async fn on_slice(&mut self, _index: usize, _slice: DlpSlice) -> Result<(), ReadError> {
        self.slices += 1;
        Ok(())
    }
}

async fn inspect(config: &Config, file: PathBuf) -> Result<(), BoxError> {
    let options = config.translator_options().read_options;
    let mut census = Census::default();
    match sniff(&file).await? {
        PrintableKind::Fdm => {
            FdmReader::new(options).read(&file, &mut census).await?;
            tracing::info!("{}: FDM printable with {} commands", file.display(), census.commands);
        }
        PrintableKind::Dlp => {
            DlpReader::new(options).read(&file, &mut census).await?;
            tracing::info!("{}: DLP printable with {} slices", file.display(), census.slices);
        }
    }
    Ok(())
}

async fn print(
    config: &Config,
    catalog: &PrinterCatalog,
    kind: DriverKind,
    printer_type_id: Option<String>,
    file: PathBuf,
) -> Result<(), BoxError> {
    let driver: Arc<dyn PrinterDriver> = match kind {
        DriverKind::Virtual => VirtualPrinter::new(config.virtual_printer.clone()),
        DriverKind::Serial => {
            let Some(id) = printer_type_id.as_deref() else {
                return Err("--printer-type is required for the serial driver".into());
            };
            let printer_type = catalog.printer_type(id)?.clone();
            SerialPrinter::open_system(printer_type, config.serial.clone())
        }
        DriverKind::Octoprint => OctoprintPrinter::new(config.octoprint.clone())?,
    };
    let mut events = driver.subscribe();

    wait_for(driver.as_ref(), &mut events, |state| state == DriverState::Ready).await?;
    let response = driver.loadmodel(Asset::file(&file)).await;
    if !response.success {
        return Err(format!("loadmodel failed: {:?}", response.errors).into());
    }
    wait_for(driver.as_ref(), &mut events, |state| state != DriverState::LoadingModel).await?;
    if driver.state() != DriverState::ModelLoaded {
        return Err(format!("{} could not be loaded", file.display()).into());
    }

    let response = driver.print().await;
    if !response.success {
        return Err(format!("print failed: {:?}", response.errors).into());
    }
    wait_for(driver.as_ref(), &mut events, |state| state == DriverState::Ready).await?;
    tracing::info!("Print of {} finished", file.display());
    driver.cleanup().await;
    Ok(())
}

/// Logs driver events until the driver's state satisfies `done`.
async fn wait_for(
    driver: &dyn PrinterDriver,
    events: &mut broadcast::Receiver<DriverEvent>,
    done: impl Fn(DriverState) -> bool,
) -> Result<(), BoxError> {
    loop {
        let state = driver.state();
        if done(state) {
            return Ok(());
        }
        if state == DriverState::Disconnected {
            return Err("printer is disconnected".into());
        }
        match events.recv().await {
            Ok(DriverEvent::Status(status)) => tracing::info!(
                "Status: {} {:.0}%",
                status.state,
                status.job.percent_complete.unwrap_or(0.0)
            ),
            Ok(DriverEvent::ConnectionFailed) => return Err("printer connection failed".into()),
            Ok(DriverEvent::StateChanged(state)) => tracing::debug!("State changed to {}", state),
            Ok(DriverEvent::Ready) => tracing::info!("Printer ready"),
            Err(RecvError::Lagged(missed)) => tracing::warn!("Missed {} driver events", missed),
            Err(RecvError::Closed) => return Err("driver went away".into()),
        }
    }
}
