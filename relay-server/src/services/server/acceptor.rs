use std::io;
use std::time::Duration;

use axum_server::accept::Accept;
use socket2::TcpKeepalive;
use tokio::net::TcpStream;

use crate::statsd::RelayCounters;

/// Accepts relay connections with `TCP_NODELAY` and keep-alive set.
#[derive(Clone, Debug)]
pub struct RelayAcceptor(TcpKeepalive);

impl RelayAcceptor {
    pub fn new(keepalive: Duration, retries: u32) -> Self {
        Self(build_keepalive(keepalive, retries))
    }
}

impl<S> Accept<TcpStream, S> for RelayAcceptor {
    type Stream = TcpStream;
    type Service = S;
    type Future = std::future::Ready<io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: S) -> Self::Future {
        let mut keepalive = "ok";
        let mut nodelay = "ok";

        let sock_ref = socket2::SockRef::from(&stream);
        if let Err(e) = sock_ref.set_tcp_keepalive(&self.0) {
            relay_log::trace!("error trying to set TCP keepalive: {e}");
            keepalive = "error";
        }

        if let Err(e) = stream.set_nodelay(true) {
            relay_log::trace!("failed to set TCP_NODELAY: {e}");
            nodelay = "error";
        }

        relay_statsd::metric!(
            counter(RelayCounters::ServerSocketAccept) += 1,
            keepalive = keepalive,
            nodelay = nodelay
        );

        std::future::ready(Ok((stream, service)))
    }
}

fn build_keepalive(timeout: Duration, retries: u32) -> TcpKeepalive {
    let mut ka = TcpKeepalive::new().with_time(timeout);
    #[cfg(not(any(target_os = "openbsd", target_os = "redox", target_os = "solaris")))]
    {
        ka = ka.with_interval(timeout);
    }

    #[cfg(not(any(
        target_os = "openbsd",
        target_os = "redox",
        target_os = "solaris",
        target_os = "windows"
    )))]
    {
        ka = ka.with_retries(retries);
    }

    ka
}
