#![cfg(all(unix, feature = "unix"))]

//! Echoes lines through a connected socket pair.
//!
//! Lines typed on the standard input are written to an in-memory
//! stream, piped into one end of the pair, echoed back upper-cased by
//! the other end, then printed.

use std::{
    io::{stdin, BufRead},
    time::Duration,
};

use io_pipe_stream::{
    pipe::{pipe, read_all},
    runtimes::unix::pair,
    MemoryStream, Readable, Stream, Writable,
};
use tokio::runtime::Builder;

fn main() {
    env_logger::init();

    let runtime = Builder::new_current_thread().enable_all().build().unwrap();

    runtime.block_on(async {
        let (client, server) = pair().unwrap();
        let input = MemoryStream::new();
        let timeout = Some(Duration::from_secs(5));

        for line in stdin().lock().lines() {
            let line = line.unwrap();
            input.write(line.as_bytes(), None).await.unwrap();
            input.write(b"\n", None).await.unwrap();
        }

        drop(input.end(&[], None));

        let echo = async {
            while server.is_readable() {
                let line = match server.read(0, Some(b'\n'), timeout).await {
                    Ok(line) => line,
                    Err(err) => {
                        println!("server stopped: {err}");
                        break;
                    }
                };

                server
                    .write(&line.to_ascii_uppercase(), timeout)
                    .await
                    .unwrap();
            }

            server.end(&[], timeout).await.unwrap();
        };

        let request = async {
            let total = pipe(&input, &client, true, 0, None, timeout)
                .await
                .unwrap();
            println!("sent {total} bytes");
        };

        let response = async { read_all(&client, 0, None).await.unwrap() };

        let ((), (), response) = tokio::join!(echo, request, response);

        print!("{}", String::from_utf8_lossy(&response));
        assert!(!client.is_open());
    });
}
