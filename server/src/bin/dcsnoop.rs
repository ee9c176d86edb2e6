//! `dcsnoop`: passive diagnostic proxy, grounded in `snoop/snoop.c`. Accepts
//! connections on `--listen`, opens a matching connection to `--connect` for
//! each one, and relays every frame in both directions, logging its header
//! (direction, `request_uid`, `op_class`/`operation`, `complete`, `data_len`)
//! as it passes through. Never originates or answers a request itself.

use std::time::Duration;

use dcache_proto::{frame::Operation, Address, AnyStream, Plug};
use slog::{o, Drain, Logger};
use structopt::StructOpt;
use tokio::time::sleep;

#[derive(Debug, StructOpt)]
#[structopt(name = "dcsnoop", about = "Passive frame-logging proxy for the session cache wire protocol")]
struct Opt {
    /// Address to accept snooped connections on.
    #[structopt(long, parse(try_from_str))]
    listen: Address,

    /// Real server/multiplexer address each accepted connection is proxied to.
    #[structopt(long, parse(try_from_str))]
    connect: Address,

    /// Increase log verbosity; may be repeated.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u64,
}

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
    Logger::root(drain, o!("bin" => "dcsnoop"))
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

async fn run(opt: Opt, log: Logger) -> std::io::Result<()> {
    let listener = dcache_proto::AnyListener::bind(&opt.listen).await?;
    slog::info!(log, "snooping"; "listen" => %opt.listen, "connect" => %opt.connect);

    loop {
        let accepted = listener.accept().await?;
        let upstream_addr = opt.connect.clone();
        let conn_log = log.new(o!("component" => "snoop-conn"));
        tokio::spawn(async move {
            match dcache_proto::connect(&upstream_addr).await {
                Ok(upstream) => {
                    if let Err(e) = proxy_connection(accepted, upstream, conn_log.clone()).await {
                        slog::warn!(conn_log, "snoop connection ended"; "error" => %e);
                    }
                }
                Err(e) => slog::warn!(conn_log, "could not connect upstream"; "error" => %e),
            }
        });
    }
}

async fn proxy_connection(client_conn: AnyStream, server_conn: AnyStream, log: Logger) -> std::io::Result<()> {
    // `downstream` observes requests (server role: flags = 0); `upstream`
    // observes responses (client role: flags = TO_SERVER).
    let mut downstream = Plug::new(client_conn, 0, log.new(o!("side" => "client")));
    let mut upstream = Plug::new(server_conn, dcache_proto::TO_SERVER, log.new(o!("side" => "server")));

    loop {
        downstream.io().await.map_err(to_io)?;
        upstream.io().await.map_err(to_io)?;

        if let Some((uid, cmd, payload)) = downstream.read(false) {
            log_frame(&log, "request", uid, cmd, payload.len());
            let payload = payload.to_vec();
            downstream.consume().map_err(to_io)?;
            upstream.write(false, uid, cmd, &payload).map_err(to_io)?;
            upstream.commit().map_err(to_io)?;
        }

        if let Some((uid, cmd, payload)) = upstream.read(false) {
            log_frame(&log, "response", uid, cmd, payload.len());
            let payload = payload.to_vec();
            upstream.consume().map_err(to_io)?;
            downstream.write(false, uid, cmd, &payload).map_err(to_io)?;
            downstream.commit().map_err(to_io)?;
        }

        sleep(Duration::from_millis(5)).await;
    }
}

fn log_frame(log: &Logger, direction: &str, uid: u32, cmd: Operation, data_len: usize) {
    slog::info!(log, "frame";
        "direction" => direction,
        "request_uid" => uid,
        "operation" => ?cmd,
        "data_len" => data_len);
}

fn to_io(e: dcache_proto::ProtocolError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}
