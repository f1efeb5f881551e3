//! Minimal TCP echo server built directly on the core scheduler
//! primitives: `spawn`, `park`, and raw non-blocking sockets. `nyco`
//! only supplies the scheduler and the readiness poller — there is no
//! bundled `TcpListener`/`TcpStream` wrapper, so this demo talks to
//! `std::net` directly and parks on the raw fd.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::str::FromStr;

use log::warn;
use nyco::Interest;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5555";

fn would_block(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

fn echo_connection(mut conn: TcpStream) {
    conn.set_nonblocking(true).expect("set_nonblocking");
    let fd = conn.as_raw_fd();
    let mut buf = [0u8; 16 * 1024];

    loop {
        match conn.read(&mut buf) {
            Ok(0) => break, // peer hung up
            Ok(size) => {
                if let Err(e) = conn.write_all(&buf[..size]) {
                    warn!("echo write failed: {e}");
                    break;
                }
            }
            Err(e) if would_block(&e) => {
                nyco::park(fd, Interest::read(), nyco::NO_TIMEOUT);
            }
            Err(e) => {
                warn!("echo read failed: {e}");
                break;
            }
        }
    }
}

fn listen_addr() -> SocketAddr {
    SocketAddr::from_str(DEFAULT_LISTEN_ADDR).unwrap()
}

fn main() {
    env_logger::init();

    nyco::spawn(|| {
        let addr = listen_addr();
        let listener = TcpListener::bind(addr).expect("bind");
        listener.set_nonblocking(true).expect("set_nonblocking");
        let fd = listener.as_raw_fd();

        println!("listening on {}", listener.local_addr().unwrap());

        loop {
            match listener.accept() {
                Ok((conn, _peer)) => {
                    nyco::spawn(move || echo_connection(conn)).expect("spawn connection handler");
                }
                Err(e) if would_block(&e) => {
                    nyco::park(fd, Interest::read(), nyco::NO_TIMEOUT);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    })
    .expect("spawn listener coroutine");

    nyco::run();
}
