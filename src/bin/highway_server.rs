use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use clap::Parser;

use highway::{
    global_config, setup_local_tracing, AppError, AppResult, HighwayConfig, HighwayHost,
    OperationRegistry, GLOBAL_CONFIG,
};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();

    if std::env::var("RUST_LOG").is_err() {
        let level = match commandline.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    setup_local_tracing()?;

    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("conf.toml"), PathBuf::from);
    let config = HighwayConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    GLOBAL_CONFIG
        .set(config)
        .expect("set highway config failed");

    let registry = Arc::new(OperationRegistry::new());
    register_sample_operations(&registry);

    let host = HighwayHost::new(global_config().clone(), registry);
    host.start()?;

    Ok(())
}

/// Stand-in for the schema-generation layer, which would normally populate
/// the registry from generated service definitions.
fn register_sample_operations(registry: &OperationRegistry) {
    registry.register("demo", "sample", "echo", |args: BytesMut| async move {
        Ok(args)
    });
    registry.register(
        "calculator",
        "basic",
        "add",
        |mut args: BytesMut| async move {
            if args.remaining() < 8 {
                return Err(AppError::InvalidValue("add needs two i32 args".to_string()));
            }
            let a = args.get_i32();
            let b = args.get_i32();
            let mut out = BytesMut::with_capacity(4);
            out.put_i32(a + b);
            Ok(out)
        },
    );
}
