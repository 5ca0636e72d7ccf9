use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use switchyard::{ClientChannel, ClientHooks, ConnectedChannel, ConnectedHooks, Decoder, Reactor, ServerChannel, ServerHooks};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Mute;

impl Decoder for Mute {
    fn decode(&self, _data: &[u8]) -> (usize, Option<Vec<u8>>) {
        (0, None)
    }
}
impl ConnectedHooks for Mute {}
impl ClientHooks for Mute {}

struct Server;

impl ServerHooks for Server {
    fn on_accept(&self, reactor: &Arc<Reactor>, stream: mio::net::TcpStream, _peer_addr: SocketAddr) {
        ConnectedChannel::new(reactor, stream, Mute).expect("failed to register accepted stream");
    }
}

#[test]
fn terminate_tears_down_many_established_channels_and_worker_threads() {
    init_tracing();
    let reactor = Reactor::new(4, 256).unwrap();
    let server = ServerChannel::new(&reactor, Server);
    assert!(server.init("127.0.0.1", 28_714, 64));

    let mut clients = Vec::new();
    for _ in 0..50 {
        let client = ClientChannel::new(&reactor, "127.0.0.1", 28_714, Mute);
        assert!(client.init());
        clients.push(client);
    }
    std::thread::sleep(Duration::from_millis(150));
    assert!(reactor.fd_count() >= 51, "expected the listener plus 50 client-side fds to be registered");

    // Idempotent and must actually return: worker threads join, self-pipes
    // close, and a second call is a no-op rather than a hang or panic.
    reactor.terminate();
    reactor.terminate();

    assert_eq!(reactor.fd_count(), 0);
}
