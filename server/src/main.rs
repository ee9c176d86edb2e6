//! `dcached`: single-threaded, non-blocking distributed session cache
//! server. Binds a listener, accepts connections, and drives the engine's
//! per-tick dispatch loop until a `--killable` SIGUSR1 arrives.

mod client;
mod config;
mod dispatch;
mod engine;
mod error;
mod listener;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use dcache_proto::Address;
use slog::{o, Drain, Logger};
use structopt::StructOpt;
use tokio::time;

use config::Opt;
use engine::Engine;
use error::ServerError;
use listener::Listener;

fn root_logger(verbose: u64) -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let level = match verbose {
        0 => slog::Level::Info,
        1 => slog::Level::Debug,
        _ => slog::Level::Trace,
    };
    let drain = slog::LevelFilter::new(drain, level).fuse();
    Logger::root(drain, o!("bin" => "dcached"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opt = Opt::from_args();
    let log = root_logger(opt.verbose);

    if let Err(e) = run(opt, log.clone()).await {
        slog::error!(log, "fatal"; "error" => %e);
        std::process::exit(1);
    }
}

async fn run(opt: Opt, log: Logger) -> Result<(), ServerError> {
    let sessions = opt.validated_sessions()?;

    if opt.daemon {
        daemonize(opt.pidfile.as_deref())?;
    }

    let listener = Listener::bind(&opt.listen, log.new(o!("component" => "listener"))).await?;

    if let Address::Unix(path) = &opt.listen {
        apply_sock_ownership(path, opt.sockowner.as_deref(), opt.sockgroup.as_deref(), opt.sockperms)?;
    }

    if let Some(user) = &opt.user {
        drop_privileges(user)?;
    }

    let mut engine = Engine::new(sessions as usize, log.new(o!("component" => "engine")));

    let mut tick = time::interval(Duration::from_millis(10));
    let mut ticks_since_progress = 0u64;

    let mut killswitch = if opt.killable {
        Some(
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
                .map_err(ServerError::from)?,
        )
    } else {
        None
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok(stream) => {
                        let key = engine.accept(stream);
                        slog::debug!(log, "client registered"; "client" => key, "total" => engine.num_clients());
                    }
                    Err(e) => slog::warn!(log, "accept failed"; "error" => %e),
                }
            }
            _ = tick.tick() => {
                engine.tick().await;
                if opt.progress > 0 {
                    ticks_since_progress += 1;
                    if ticks_since_progress >= opt.progress {
                        engine.log_progress();
                        ticks_since_progress = 0;
                    }
                }
            }
            _ = wait_for_signal(killswitch.as_mut()) => {
                slog::info!(log, "SIGUSR1 received, shutting down");
                return Ok(());
            }
        }
    }
}

async fn wait_for_signal(sig: Option<&mut tokio::signal::unix::Signal>) {
    match sig {
        Some(sig) => {
            sig.recv().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn daemonize(pidfile: Option<&Path>) -> Result<(), ServerError> {
    use nix::unistd::{fork, setsid, ForkResult};
    match unsafe { fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(e) => return Err(ServerError::PrivilegeDrop(format!("fork failed: {}", e))),
    }
    setsid().map_err(|e| ServerError::PrivilegeDrop(format!("setsid failed: {}", e)))?;
    if let Some(path) = pidfile {
        std::fs::write(path, format!("{}\n", std::process::id()))?;
    }
    Ok(())
}

/// `--user` is a numeric `uid[:gid]` pair rather than a name looked up via
/// NSS. Resolving usernames would pull in a whole passwd-lookup dependency
/// for a daemon that otherwise only needs `nix`'s raw syscalls.
fn drop_privileges(user: &str) -> Result<(), ServerError> {
    let mut parts = user.splitn(2, ':');
    let uid: u32 = parts
        .next()
        .unwrap()
        .parse()
        .map_err(|_| ServerError::PrivilegeDrop(format!("--user must be numeric uid[:gid], got {:?}", user)))?;
    let gid: u32 = match parts.next() {
        Some(g) => g
            .parse()
            .map_err(|_| ServerError::PrivilegeDrop(format!("bad gid in --user: {:?}", user)))?,
        None => uid,
    };
    nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))
        .map_err(|e| ServerError::PrivilegeDrop(format!("setgid failed: {}", e)))?;
    nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))
        .map_err(|e| ServerError::PrivilegeDrop(format!("setuid failed: {}", e)))?;
    Ok(())
}

fn apply_sock_ownership(
    path: &Path,
    owner: Option<&str>,
    group: Option<&str>,
    perms: Option<u32>,
) -> Result<(), ServerError> {
    if owner.is_some() || group.is_some() {
        let uid = owner
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|_| ServerError::PrivilegeDrop("--sockowner must be numeric".into()))?
            .map(nix::unistd::Uid::from_raw);
        let gid = group
            .map(|s| s.parse::<u32>())
            .transpose()
            .map_err(|_| ServerError::PrivilegeDrop("--sockgroup must be numeric".into()))?
            .map(nix::unistd::Gid::from_raw);
        nix::unistd::chown(path, uid, gid)
            .map_err(|e| ServerError::PrivilegeDrop(format!("chown failed: {}", e)))?;
    }
    if let Some(mode) = perms {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}
