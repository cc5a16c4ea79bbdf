use std::net::{SocketAddr, TcpListener};

pub fn get_available_port() -> std::io::Result<u16> {
    Ok(free_local_addr()?.port())
}

/// A loopback address nothing is bound to right now.
pub fn free_local_addr() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    listener.local_addr()
}
