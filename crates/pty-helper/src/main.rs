// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY helper: owns the real PTY master for one session.
//!
//! stdin carries framed opcodes (`DATA`/`RESIZE`/`CLOSE`, see
//! `harness-pty-proto`), stdout is the raw PTY output, stderr is
//! diagnostics only. The helper exits mirroring the child: same exit code,
//! or the fatal signal re-raised on itself so the wait status is faithful.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use pty_proto::{Decoder, Frame};

/// PTY-owning helper process for the harness session broker.
#[derive(Debug, Parser)]
#[command(name = "harness-pty-helper", version)]
struct Args {
    /// Initial terminal columns.
    #[arg(long, default_value = "80")]
    cols: u16,

    /// Initial terminal rows.
    #[arg(long, default_value = "24")]
    rows: u16,

    /// Command to run on the PTY (after --).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

/// Newtype wrapper around the PTY master fd for use with `AsyncFd`.
#[derive(Debug)]
struct PtyFd(OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

fn main() {
    let args = Args::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("harness-pty-helper: {e:#}");
            2
        }
    };
    std::process::exit(code);
}

/// Spawn the child on a fresh PTY and pump frames until it exits.
///
/// Returns the process exit code to use; a fatal child signal never
/// returns (the signal is re-raised on this process instead).
// forkpty requires unsafe: post-fork child is partially initialized
#[allow(unsafe_code)]
fn run(args: Args) -> anyhow::Result<i32> {
    let winsize = Winsize {
        ws_col: args.cols,
        ws_row: args.rows,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: forkpty is unsafe because the child is in a
    // partially-initialized state after fork. We immediately exec.
    let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

    match result {
        ForkptyResult::Child => {
            if std::env::var_os("TERM").is_none() {
                std::env::set_var("TERM", "xterm-256color");
            }
            let c_args: Vec<CString> = args
                .command
                .iter()
                .map(|s| CString::new(s.as_bytes()))
                .collect::<Result<_, _>>()
                .context("invalid command argument")?;
            execvp(&c_args[0], &c_args).context("execvp failed")?;
            unreachable!();
        }
        ForkptyResult::Parent { child, master } => {
            let status = pump(master, child)?;
            match status {
                ChildExit::Code(code) => Ok(code),
                ChildExit::Signal(sig) => {
                    // Mirror a fatal signal faithfully: restore the default
                    // disposition and re-raise it on ourselves.
                    // SAFETY: SigDfl installs the default handler; no
                    // handler code of ours can run afterwards.
                    let _ = unsafe {
                        nix::sys::signal::signal(sig, nix::sys::signal::SigHandler::SigDfl)
                    };
                    let _ = kill(Pid::this(), sig);
                    // Unreachable for fatal signals; fall back for the rest.
                    Ok(128 + sig as i32)
                }
            }
        }
    }
}

enum ChildExit {
    Code(i32),
    Signal(Signal),
}

/// Run the frame/IO loop on a small runtime until the child exits.
fn pump(master: OwnedFd, child: Pid) -> anyhow::Result<ChildExit> {
    set_nonblocking(&master)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime")?;
    runtime.block_on(pump_async(master, child))
}

async fn pump_async(master: OwnedFd, child: Pid) -> anyhow::Result<ChildExit> {
    let master = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;

    // Frame reader: stdin bytes → decoder → frame channel. A decode
    // failure terminates the helper (the channel carries the error).
    let (frame_tx, mut frame_rx) = mpsc::channel::<anyhow::Result<Frame>>(64);
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.push(&buf[..n]);
            loop {
                match decoder.next() {
                    Ok(Some(frame)) => {
                        if frame_tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = frame_tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 8192];
    let mut closing = false;
    let mut deadline: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            // PTY output → stdout, verbatim. EIO means the child side is
            // gone, which is the normal PTY end-of-stream on Linux.
            result = read_chunk(&master, &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        stdout.write_all(&buf[..n]).await.context("stdout write")?;
                        stdout.flush().await.context("stdout flush")?;
                    }
                    Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                    Err(e) => return Err(e.into()),
                }
            }

            // Inbound frames, unless CLOSE already arrived.
            frame = frame_rx.recv(), if !closing => {
                match frame {
                    Some(Ok(Frame::Data(payload))) => {
                        write_all(&master, &payload).await.context("pty write")?;
                    }
                    Some(Ok(Frame::Resize { cols, rows })) => {
                        resize(&master, cols, rows)?;
                    }
                    Some(Ok(Frame::Close)) | None => {
                        // Graceful teardown: hang up the child, keep
                        // draining output, force-kill if it lingers.
                        closing = true;
                        let _ = kill(child, Signal::SIGHUP);
                        deadline = Some(tokio::time::Instant::now() + Duration::from_secs(5));
                    }
                    Some(Err(e)) => {
                        let _ = kill(child, Signal::SIGHUP);
                        return Err(e).context("frame decode");
                    }
                }
            }

            _ = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            }, if deadline.is_some() => {
                let _ = kill(child, Signal::SIGKILL);
                break;
            }
        }
    }

    // Reap the child off the runtime; this is the last thing we do.
    let status = tokio::task::spawn_blocking(move || wait_for_exit(child))
        .await
        .context("join wait thread")??;
    Ok(status)
}

/// Block until the child exits and classify the wait status.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ChildExit> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Code(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ChildExit::Signal(sig)),
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(nix::errno::Errno::ECHILD) => return Ok(ChildExit::Code(0)),
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}

/// Set the given file descriptor to non-blocking mode.
fn set_nonblocking(fd: &impl AsFd) -> std::io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Read a chunk of data from the async PTY fd.
async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| nix::unistd::read(inner.get_ref(), buf).map_err(io_err)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write all data to the async PTY fd.
async fn write_all(afd: &AsyncFd<PtyFd>, data: &[u8]) -> std::io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| nix::unistd::write(inner.get_ref(), &data[offset..]).map_err(io_err))
        {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

/// Apply new dimensions to the PTY via `TIOCSWINSZ` (also delivers
/// SIGWINCH to the child).
// TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
#[allow(unsafe_code)]
fn resize(afd: &AsyncFd<PtyFd>, cols: u16, rows: u16) -> anyhow::Result<()> {
    let ws = Winsize {
        ws_col: cols,
        ws_row: rows,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
    // size on the PTY master fd. The Winsize struct is properly
    // initialized.
    let ret = unsafe { libc::ioctl(afd.get_ref().as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if ret < 0 {
        anyhow::bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}
