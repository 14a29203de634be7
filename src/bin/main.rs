use std::path::PathBuf;
use std::sync::Arc;

use automation_proxy::{
    AutomationProxy, DelegateRef, LaunchDelegate, LaunchResult, ProxyConfig, ProxyFactory,
};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

/// Launch and supervise out-of-process automation servers
#[derive(Parser)]
#[command(name = "automation-proxy")]
#[command(version)]
#[command(about = "Launch and supervise out-of-process automation servers")]
struct Cli {
    /// Configuration file (default: user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the server for a profile and report the result
    Launch {
        /// Profile name from the configuration file
        profile: String,

        /// Keep the server running until it exits or Ctrl-C is pressed
        #[arg(long)]
        hold: bool,
    },
    /// List configured profiles
    Profiles,
}

enum CliEvent {
    Launched(LaunchResult),
    Died,
}

/// Forwards worker-thread callbacks to the main task.
struct CliDelegate {
    tx: mpsc::UnboundedSender<CliEvent>,
}

impl LaunchDelegate for CliDelegate {
    fn launch_complete(&self, _proxy: Option<Arc<AutomationProxy>>, result: LaunchResult) {
        let _ = self.tx.send(CliEvent::Launched(result));
    }

    fn server_died(&self) {
        let _ = self.tx.send(CliEvent::Died);
    }
}

fn load_config(path: Option<PathBuf>) -> ProxyConfig {
    let loaded = match path {
        Some(path) => ProxyConfig::load(&path),
        None => ProxyConfig::load_user(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

async fn launch(config: &ProxyConfig, profile: &str, hold: bool) -> i32 {
    let params = match config.to_launch_params(profile) {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let factory = ProxyFactory::with_process_launcher();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let delegate: DelegateRef = Arc::new(CliDelegate { tx });

    let handle = match factory.get_or_create_proxy(Arc::clone(&delegate), params) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let mut code = match rx.recv().await {
        Some(CliEvent::Launched(LaunchResult::Success)) => {
            eprintln!("Profile '{}': {}", profile, LaunchResult::Success);
            0
        }
        Some(CliEvent::Launched(result)) => {
            eprintln!("Profile '{}': {}", profile, result);
            1
        }
        Some(CliEvent::Died) | None => {
            eprintln!("Profile '{}': server went away", profile);
            1
        }
    };

    if hold && code == 0 {
        eprintln!("Holding; press Ctrl-C to stop");
        tokio::select! {
            event = rx.recv() => {
                if matches!(event, Some(CliEvent::Died)) {
                    eprintln!("Profile '{}': server died", profile);
                    code = 1;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping");
            }
        }
    }

    if let Err(e) = factory.release_proxy(&handle, &delegate).await {
        eprintln!("Error: {}", e);
        code = 1;
    }
    code
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config);

    match cli.command {
        Commands::Launch { profile, hold } => {
            let code = launch(&config, &profile, hold).await;
            std::process::exit(code);
        }
        Commands::Profiles => {
            let names = config.profile_names();
            if names.is_empty() {
                eprintln!("No profiles configured");
            }
            for name in names {
                println!("{}", name);
            }
        }
    }
}
