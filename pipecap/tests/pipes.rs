#![cfg(unix)]

mod common;

use std::fs::{self, OpenOptions};

use anyhow::Result;
use pretty_assertions::assert_eq;

use common::{count_fds, pipes, printf, temp_path, write_fd, write_stderr, write_stdout};
use pipecap::{
    pipe_capacity, query_max_capacity, Capacity, CaptureError, Content, Destination, SharedBuffer,
    Stream,
};

fn text(s: &str) -> Content {
    Content::Text(s.to_owned())
}

fn read_out(out: Option<pipecap::Output>) -> Result<Content> {
    let mut reader = out.and_then(|o| o.into_reader()).expect("internal buffer output");
    Ok(reader.read_all()?)
}

fn basic_dual_capture() -> Result<()> {
    let session = pipes().enter()?;
    assert_eq!(session.relay_count(), 0);
    printf("Hellø\n");
    write_stderr("Hi, stdérr\n");
    let captured = session.finish()?;

    assert_eq!(read_out(captured.stdout)?, text("Hellø\n"));
    assert_eq!(read_out(captured.stderr)?, text("Hi, stdérr\n"));
    Ok(())
}

fn raw_bytes() -> Result<()> {
    let (_, captured) = pipecap::pipes(pipes().raw(), || {
        printf("Hellø\n");
        write_stderr("Hi, stdérr\n");
    })?;
    assert_eq!(read_out(captured.stdout)?, Content::Bytes("Hellø\n".as_bytes().to_vec()));
    assert_eq!(read_out(captured.stderr)?, Content::Bytes("Hi, stdérr\n".as_bytes().to_vec()));
    Ok(())
}

fn other_encoding() -> Result<()> {
    let (_, captured) = pipecap::pipes(pipes().encoding_label("latin1")?, || {
        write_stdout("caf\u{e9}");
        write_fd(1, &[0xe9]);
    })?;
    // The first write is UTF-8 read as windows-1252, the second a real é.
    assert_eq!(read_out(captured.stdout)?, text("cafÃ©é"));
    Ok(())
}

fn merged_into_pipe() -> Result<()> {
    let (_, captured) = pipecap::pipes(pipes().stderr(Destination::Stdout), || {
        write_stdout("Hellø\n");
        write_stderr("Hi, stdérr\n");
    })?;
    assert!(captured.stderr.is_none());
    assert_eq!(read_out(captured.stdout)?, text("Hellø\nHi, stdérr\n"));
    Ok(())
}

fn nested_sessions() -> Result<()> {
    let outer = pipes().stderr(Destination::Discard).enter()?;
    write_stdout("outer 1\n");
    let inner = pipes().enter()?;
    write_stdout("inner\n");
    write_stderr("inner err\n");
    let inner = inner.finish()?;
    write_stdout("outer 2\n");
    let outer = outer.finish()?;

    assert_eq!(read_out(inner.stdout)?, text("inner\n"));
    assert_eq!(read_out(inner.stderr)?, text("inner err\n"));
    assert_eq!(read_out(outer.stdout)?, text("outer 1\nouter 2\n"));
    assert!(outer.stderr.is_none());
    Ok(())
}

fn out_of_order_finish() -> Result<()> {
    let outer = pipes().stderr(Destination::Discard).enter()?;
    let inner = pipes().stderr(Destination::Discard).enter()?;
    write_stdout("before\n");

    // Finishing the outer session first must not hang on its pipe nor
    // un-redirect the inner one.
    let outer = outer.finish()?;
    write_stdout("still inner\n");
    let inner = inner.finish()?;

    assert_eq!(read_out(outer.stdout)?, text(""));
    assert_eq!(read_out(inner.stdout)?, text("before\nstill inner\n"));
    Ok(())
}

fn no_descriptor_leak() -> Result<()> {
    let baseline = count_fds();
    for i in 0..10 {
        let (_, captured) = pipecap::pipes(pipes(), || write_stdout("ok\n"))?;
        assert_eq!(read_out(captured.stdout)?, text("ok\n"));
        drop(captured.stderr);
        assert_eq!(count_fds(), baseline, "after plain cycle {}", i);

        let (_, captured) = pipecap::pipes(
            pipes()
                .stdout(Destination::forward(SharedBuffer::new()))
                .stderr(Destination::Stdout),
            || write_stderr("ok\n"),
        )?;
        drop(captured);
        assert_eq!(count_fds(), baseline, "after relayed cycle {}", i);
    }
    Ok(())
}

fn panic_in_body_restores() -> Result<()> {
    let baseline = count_fds();
    let result = std::panic::catch_unwind(|| {
        pipecap::pipes(pipes(), || {
            write_stdout("lost\n");
            panic!("body failed");
        })
    });
    assert!(result.is_err());
    assert_eq!(count_fds(), baseline);

    let (_, captured) = pipecap::pipes(pipes(), || write_stdout("fresh\n"))?;
    assert_eq!(read_out(captured.stdout)?, text("fresh\n"));
    Ok(())
}

fn discard() -> Result<()> {
    let session = pipes().stdout(Destination::Discard).stderr(Destination::Discard).enter()?;
    assert_eq!(session.relay_count(), 0);
    write_stdout("into the void\n");
    write_stderr("into the void\n");
    let captured = session.finish()?;
    assert!(captured.stdout.is_none());
    assert!(captured.stderr.is_none());
    Ok(())
}

fn file_destinations() -> Result<()> {
    let out_path = temp_path("stdout.txt");
    let err_path = temp_path("stderr.txt");
    let open = |p: &std::path::Path| {
        OpenOptions::new().create(true).truncate(true).write(true).open(p)
    };

    let session = pipes()
        .stdout(Destination::File(open(out_path.as_path())?))
        .stderr(Destination::File(open(err_path.as_path())?))
        .enter()?;
    assert_eq!(session.relay_count(), 0);
    printf("some stdout\n");
    write_stderr("some stderr\n");
    let captured = session.finish()?;
    assert!(captured.stdout.and_then(|o| o.into_file()).is_some());
    assert!(captured.stderr.and_then(|o| o.into_file()).is_some());

    assert_eq!(fs::read_to_string(&out_path)?, "some stdout\n");
    assert_eq!(fs::read_to_string(&err_path)?, "some stderr\n");

    // One fd-backed stream and one relayed stream.
    let errors = SharedBuffer::new();
    let session = pipes()
        .stdout(Destination::File(open(out_path.as_path())?))
        .stderr(Destination::forward(errors.clone()))
        .enter()?;
    assert_eq!(session.relay_count(), 1);
    write_stdout("some stdout\n");
    write_stderr("some stderr\n");
    session.finish()?;

    assert_eq!(fs::read_to_string(&out_path)?, "some stdout\n");
    assert_eq!(errors.text(), "some stderr\n");

    fs::remove_file(out_path)?;
    fs::remove_file(err_path)?;
    Ok(())
}

fn invalid_target() -> Result<()> {
    let saved = unsafe { libc::dup(libc::STDERR_FILENO) };
    assert!(saved >= 0);
    unsafe { libc::close(libc::STDERR_FILENO) };

    let baseline = count_fds();
    let result = pipes().enter();

    unsafe {
        libc::dup2(saved, libc::STDERR_FILENO);
        libc::close(saved);
    }
    assert!(matches!(result, Err(CaptureError::InvalidTarget(Stream::Stderr))));
    assert_eq!(count_fds(), baseline + 1);
    Ok(())
}

/// Lowest descriptor limit that leaves exactly `free` numbers unused.
#[cfg(target_os = "linux")]
fn limit_leaving(free: usize) -> u64 {
    let open = |fd: i32| unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1;
    let mut unused = 0;
    let mut limit = 0;
    while unused < free {
        if !open(limit) {
            unused += 1;
        }
        limit += 1;
    }
    limit as u64
}

#[cfg(target_os = "linux")]
fn descriptor_exhaustion_rolls_back() -> Result<()> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    let stdout_before = fs::read_link("/proc/self/fd/1")?;
    let stderr_before = fs::read_link("/proc/self/fd/2")?;
    let baseline = count_fds();
    let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;

    // Room for the stdout pipe and its saved duplicate, not for the stderr pipe.
    setrlimit(Resource::RLIMIT_NOFILE, limit_leaving(3), hard)?;
    let result = pipes()
        .capacity(Capacity::Unchanged)
        .stdout(Destination::forward(SharedBuffer::new()))
        .enter();
    setrlimit(Resource::RLIMIT_NOFILE, soft, hard)?;

    assert!(
        matches!(result, Err(CaptureError::ResourceExhausted { .. })),
        "got {:?}",
        result
    );
    assert_eq!(fs::read_link("/proc/self/fd/1")?, stdout_before);
    assert_eq!(fs::read_link("/proc/self/fd/2")?, stderr_before);
    assert_eq!(count_fds(), baseline);

    // The process can still capture once descriptors are available again.
    let (_, captured) = pipecap::pipes(pipes(), || write_stdout("after\n"))?;
    assert_eq!(read_out(captured.stdout)?, text("after\n"));
    Ok(())
}

fn capacity_control() -> Result<()> {
    let Some(max) = query_max_capacity() else {
        assert_eq!(pipe_capacity(1)?, None);
        return Ok(());
    };
    if cfg!(target_os = "linux") {
        assert!((65535..=1024 * 1024).contains(&max), "max = {}", max);
    }

    let session = pipes().enter()?;
    let stdout_size = pipe_capacity(libc::STDOUT_FILENO);
    let stderr_size = pipe_capacity(libc::STDERR_FILENO);
    session.finish()?;
    assert_eq!(stdout_size?, Some(max));
    assert_eq!(stderr_size?, Some(max));

    let session = pipes().capacity(Capacity::Bytes(1 << 18)).enter()?;
    let stdout_size = pipe_capacity(libc::STDOUT_FILENO);
    session.finish()?;
    assert_eq!(stdout_size?, Some(1 << 18));

    // Raised capacity lets a lazily read pipe hold more than the OS default.
    if max > 100_001 {
        let long = "x".repeat(100_000);
        let (_, captured) = pipecap::pipes(pipes(), || write_stdout(&format!("{}\n", long)))?;
        assert_eq!(read_out(captured.stdout)?, text(&format!("{}\n", long)));
    }
    Ok(())
}

fn eager_drain_lifts_the_pipe_bound() -> Result<()> {
    let long = "y".repeat(4 << 20);
    let (_, captured) = pipecap::pipes(
        pipes().capacity(Capacity::Unchanged).eager_drain(true).chunk_size(4096),
        || {
            write_stdout(&long);
            write_stderr("done\n");
        },
    )?;
    let out = read_out(captured.stdout)?;
    assert_eq!(out.as_bytes().len(), long.len());
    assert!(out.as_bytes().iter().all(|&b| b == b'y'));
    assert_eq!(read_out(captured.stderr)?, text("done\n"));
    Ok(())
}

// Descriptors 1 and 2 are process-wide and the harness reports results on
// them, so every scenario runs inside this one test.
#[test]
fn internal_buffer_sessions() -> Result<()> {
    basic_dual_capture()?;
    raw_bytes()?;
    other_encoding()?;
    merged_into_pipe()?;
    nested_sessions()?;
    out_of_order_finish()?;
    no_descriptor_leak()?;
    panic_in_body_restores()?;
    discard()?;
    file_destinations()?;
    invalid_target()?;
    #[cfg(target_os = "linux")]
    descriptor_exhaustion_rolls_back()?;
    capacity_control()?;
    eager_drain_lifts_the_pipe_bound()?;
    Ok(())
}
