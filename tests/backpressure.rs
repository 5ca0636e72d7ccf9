use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;

use switchyard::{ClientChannel, ClientHooks, ConnectedHooks, Decoder, Reactor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const HEADER: usize = core::mem::size_of::<u32>();

struct Mute;

impl Decoder for Mute {
    fn decode(&self, _data: &[u8]) -> (usize, Option<Vec<u8>>) {
        (0, None)
    }
}

impl ConnectedHooks for Mute {}
impl ClientHooks for Mute {}

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Accepts one connection, sleeps before reading anything (so the sender's
/// write buffer has to absorb a burst before the kernel drains it), then
/// reads length-prefixed frames until EOF.
fn spawn_slow_collector() -> (SocketAddr, thread::JoinHandle<Vec<Vec<u8>>>) {
    let listener = TcpListener::bind(SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))).unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        thread::sleep(Duration::from_millis(300));
        let mut frames = Vec::new();
        loop {
            let mut header = [0u8; HEADER];
            if stream.read_exact(&mut header).is_err() {
                break;
            }
            let len = u32::from_le_bytes(header) as usize;
            let mut payload = vec![0u8; len];
            if stream.read_exact(&mut payload).is_err() {
                break;
            }
            frames.push(payload);
        }
        frames
    });
    (addr, handle)
}

#[test]
fn queued_writes_flush_once_the_slow_reader_catches_up() {
    init_tracing();
    let (addr, collector) = spawn_slow_collector();
    let reactor = Reactor::new(2, 16).unwrap();
    let client = ClientChannel::new(&reactor, addr.ip().to_string(), addr.port(), Mute);
    assert!(client.init());
    thread::sleep(Duration::from_millis(50));

    let big = vec![7u8; 4 * 1024 * 1024];
    assert!(client.send_buffer(&framed(&big)));
    let marker = b"marker-after-backpressure".to_vec();
    assert!(client.send_buffer(&framed(&marker)));

    let frames = collector.join().unwrap();
    reactor.terminate();

    assert!(frames.iter().any(|f| f.len() == big.len() && f[0] == 7), "large frame never arrived intact");
    assert!(frames.iter().any(|f| f == &marker), "marker frame never arrived after the backpressured write");
}
