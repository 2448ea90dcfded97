use std::fs::File;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::UnixStream;

use fdrelay_control::{ChannelName, ParserConfig};
use fdrelay_hub::{AdapterConfig, Relay, RelayConfig, RegistryConfig};
use fdrelay_transport::{AsyncFdSocket, FdSocket, TransportConfig, UnixDomainSocket};
use tokio::sync::mpsc;

use crate::cmd::RelayArgs;
use crate::exit::{hub_error, io_error, transport_error, CliError, CliResult, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub fn run(args: RelayArgs, format: OutputFormat) -> CliResult<i32> {
    let config = relay_config(&args)?;
    let transport = TransportConfig {
        recv_buffer_size: args.recv_buffer,
        ..TransportConfig::default()
    };
    let control = open_control(&args, transport)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(serve(control, config, format))
}

async fn serve(control: FdSocket, config: RelayConfig, format: OutputFormat) -> CliResult<i32> {
    let control = AsyncFdSocket::from_blocking(control)
        .map_err(|err| transport_error("control socket setup failed", err))?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event, format);
        }
    });

    let result = Relay::new(control, config)
        .with_observer(events_tx)
        .run_until(interrupted())
        .await;
    let _ = printer.await;

    match result {
        Ok(reason) => {
            tracing::info!(reason = reason.as_str(), "relay stopped");
            Ok(SUCCESS)
        }
        Err(err) => Err(hub_error("relay failed", err)),
    }
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            error = %err,
            "signal handler setup failed; Ctrl-C will not stop the relay cleanly"
        );
        std::future::pending::<()>().await;
    }
}

fn relay_config(args: &RelayArgs) -> CliResult<RelayConfig> {
    let accepted_names: Vec<ChannelName> = args
        .channels
        .iter()
        .map(|name| ChannelName::new(name.trim()))
        .collect();
    if accepted_names.is_empty() {
        return Err(CliError::usage("--channels must name at least one channel"));
    }
    if accepted_names.iter().any(|name| name.as_str().is_empty()) {
        return Err(CliError::usage("--channels must not contain empty names"));
    }
    if args.shutdown_keyword.trim().is_empty() {
        return Err(CliError::usage("--shutdown-keyword must not be empty"));
    }
    if args.read_buffer == 0 {
        return Err(CliError::usage("--read-buffer must be greater than zero"));
    }
    if args.recv_buffer == 0 {
        return Err(CliError::usage("--recv-buffer must be greater than zero"));
    }

    Ok(RelayConfig {
        parser: ParserConfig {
            shutdown_keyword: args.shutdown_keyword.trim().to_string(),
        },
        registry: RegistryConfig {
            accepted_names,
            adapter: AdapterConfig {
                read_buffer_size: args.read_buffer,
            },
        },
        reply_prefix: args.reply_prefix.clone(),
    })
}

fn open_control(args: &RelayArgs, config: TransportConfig) -> CliResult<FdSocket> {
    if let Some(path) = &args.bind {
        let listener = UnixDomainSocket::bind(path)
            .map_err(|err| transport_error("bind failed", err))?
            .with_config(config);
        tracing::info!(path = %path.display(), "waiting for control connection");
        return listener
            .accept()
            .map_err(|err| transport_error("accept failed", err));
    }

    let fd = inherited_fd(args.fd)?;
    let file = File::from(fd);
    let is_socket = file
        .metadata()
        .map_err(|err| io_error("control descriptor", err))?
        .file_type()
        .is_socket();
    if !is_socket {
        return Err(CliError::usage(format!(
            "control descriptor {} is not a socket",
            args.fd
        )));
    }

    tracing::debug!(fd = args.fd, "using inherited control descriptor");
    Ok(FdSocket::with_config(
        UnixStream::from(OwnedFd::from(file)),
        config,
    ))
}

fn inherited_fd(fd: RawFd) -> CliResult<OwnedFd> {
    if fd < 0 {
        return Err(CliError::usage(format!("invalid control descriptor {fd}")));
    }
    // SAFETY: F_GETFD only inspects descriptor flags.
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
        return Err(CliError::usage(format!(
            "control descriptor {fd} is not open"
        )));
    }
    // SAFETY: the descriptor is open and was handed to this process for the
    // control stream; nothing else in the process owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}
