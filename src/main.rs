use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ovpnguard::command::pid_alive;
use ovpnguard::{state, SessionState, Settings, VpnSession};

#[derive(Parser)]
#[command(name = "ovpnguard")]
#[command(about = "OpenVPN connection manager with MAC rotation, DNS control, and an iptables kill switch")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an explicit config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect: rotate the hardware address, bring the tunnel up, arm the
    /// kill switch
    Start {
        /// Server config file; a random one from the pool is used when
        /// omitted
        #[arg(short, long)]
        server: Option<PathBuf>,

        /// Stay attached and tear the session down on Ctrl+C
        #[arg(short, long)]
        foreground: bool,
    },
    /// Disconnect and restore the pre-connection network state
    Stop,
    /// Show current session status
    Status,
    /// Generate a default config file
    Init,
    /// Store tunnel credentials in the auth file
    Auth,
}

fn main() {
    let cli = Cli::parse();

    // Logging goes to stderr so status printouts stay clean on stdout
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to initialize logging");
    }

    let settings = match Settings::discover(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let outcome = match cli.command {
        Commands::Start { server, foreground } => cmd_start(settings, server, foreground),
        Commands::Stop => cmd_stop(settings),
        Commands::Status => cmd_status(&settings),
        Commands::Init => cmd_init(&settings),
        Commands::Auth => cmd_auth(&settings),
    };

    if let Err(e) = outcome {
        error!("{e}");
        std::process::exit(1);
    }
}

fn cmd_start(
    settings: Settings,
    server: Option<PathBuf>,
    foreground: bool,
) -> Result<(), Box<dyn Error>> {
    warn_if_not_root();

    let state_dir = settings.runtime.state_dir.clone();
    let auth_file = settings.vpn.auth_file.clone();
    let mut session = VpnSession::new(settings);

    let server = match server.or_else(|| session.next_server()) {
        Some(path) => path,
        None => {
            return Err(
                "no server config available; pass --server or populate the server directory"
                    .into(),
            )
        }
    };
    info!("using server config {}", server.display());

    match session.start(&auth_file, &server)? {
        true => {
            let record = SessionState {
                tunnel_pid: session.tunnel_pid(),
                server_config: server,
                saved_dns: session.saved_dns().to_vec(),
            };
            if let Err(e) = record.save(&state_dir) {
                warn!("could not persist session state: {e}");
            }
            if let Some(pid) = session.tunnel_pid() {
                if let Err(e) = state::write_pid(&state_dir, pid) {
                    warn!("could not write pid record: {e}");
                }
            }
            println!("VPN started");

            if foreground {
                wait_for_interrupt()?;
                session.stop();
                let _ = SessionState::delete(&state_dir);
                let _ = state::clear_pid(&state_dir);
                println!("VPN stopped");
            }
            Ok(())
        }
        false => Err("all connection attempts failed".into()),
    }
}

fn cmd_stop(settings: Settings) -> Result<(), Box<dyn Error>> {
    warn_if_not_root();

    let state_dir = settings.runtime.state_dir.clone();
    let mut session = VpnSession::new(settings);

    match SessionState::load(&state_dir) {
        Ok(Some(record)) => {
            session.restore_saved_dns(record.saved_dns);
            if let Some(pid) = record.tunnel_pid {
                signal_pid(pid);
            }
        }
        Ok(None) => info!("no session state found, proceeding with best-effort cleanup"),
        Err(e) => warn!("could not read session state: {e}"),
    }

    session.stop();
    force_stop(&state_dir);
    if let Err(e) = SessionState::delete(&state_dir) {
        warn!("could not remove session state: {e}");
    }

    println!("VPN stopped");
    Ok(())
}

/// Fallback cleanup for anything a previous run left behind.
fn force_stop(state_dir: &Path) {
    if let Ok(Some(pid)) = state::read_pid(state_dir) {
        signal_pid(pid);
    }
    if let Err(e) = state::clear_pid(state_dir) {
        warn!("could not remove pid record: {e}");
    }
}

fn cmd_status(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let state_dir = &settings.runtime.state_dir;

    if !SessionState::is_active(state_dir) {
        println!("VPN Status: Not connected");
        return Ok(());
    }

    match SessionState::load(state_dir)? {
        Some(record) => {
            println!("VPN Status: Connected");
            println!("  Server: {}", record.server_config.display());
            match record.tunnel_pid {
                Some(pid) if pid_alive(pid) => println!("  Tunnel PID: {pid} (running)"),
                Some(pid) => println!("  Tunnel PID: {pid} (not running)"),
                None => println!("  Tunnel PID: unknown"),
            }
            if record.saved_dns.is_empty() {
                println!("  Saved DNS: (none)");
            } else {
                println!("  Saved DNS: {}", record.saved_dns.join(", "));
            }
        }
        None => println!("VPN Status: Not connected"),
    }
    Ok(())
}

fn cmd_init(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let path = PathBuf::from("ovpnguard.toml");
    settings.save(&path)?;
    println!("Created default config: ovpnguard.toml");
    Ok(())
}

fn cmd_auth(settings: &Settings) -> Result<(), Box<dyn Error>> {
    print!("Username: ");
    std::io::stdout().flush()?;
    let mut username = String::new();
    std::io::stdin().read_line(&mut username)?;
    let username = username.trim();
    if username.is_empty() {
        return Err("username must not be empty".into());
    }

    let password = rpassword::prompt_password("Password: ")?;

    let path = &settings.vpn.auth_file;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{username}\n{password}\n"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    println!("Credentials written to {}", path.display());
    Ok(())
}

fn wait_for_interrupt() -> Result<(), Box<dyn Error>> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    info!("press Ctrl+C to disconnect");
    rx.recv()?;
    Ok(())
}

#[cfg(unix)]
fn warn_if_not_root() {
    if !nix::unistd::geteuid().is_root() {
        warn!("not running as root; network and firewall operations will likely fail");
    }
}

#[cfg(not(unix))]
fn warn_if_not_root() {}

#[cfg(unix)]
fn signal_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => info!("sent SIGTERM to {pid}"),
        Err(e) => info!("process {pid} already gone: {e}"),
    }
}

#[cfg(not(unix))]
fn signal_pid(_pid: u32) {}
