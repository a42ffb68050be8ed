use std::{
    io::{Read, Write},
    net::TcpStream,
    thread,
    time::Duration,
};

use switchlink_server::Cli;
use switchlink_wire::{FrameReader, FrameWriter, HELLO_MAGIC, LEN_HEADER_SIZE, Message, ProtocolVersion, message::codes};

fn test_cli(port: u16) -> Cli {
    Cli {
        listen: format!("127.0.0.1:{port}").parse().unwrap(),
        topology: None,
        verbose: 0,
        quiet: 1,
        screen_name: "server".into(),
        width: 1920,
        height: 1080,
        jump_zone: 1,
        heartbeat_rate_secs: 3,
        keepalives_until_death: 3,
        handshake_timeout_secs: 30,
    }
}

fn write_frame(stream: &mut TcpStream, body: &[u8]) {
    let len = (body.len() as u32).to_be_bytes();
    stream.write_all(&len).unwrap();
    stream.write_all(body).unwrap();
}

fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut len_buf = [0u8; LEN_HEADER_SIZE];
    stream.read_exact(&mut len_buf).unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).unwrap();
    body
}

#[test]
fn client_completes_handshake_and_exchanges_screen_info() {
    let port = 28998;
    let cli = test_cli(port);
    let handle = switchlink_server::spawn(cli).expect("server spawns");
    thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("client connects");
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    client.set_nodelay(true).unwrap();

    // Server hello: magic + major + minor, no name.
    let hello = read_frame(&mut client);
    assert!(hello.starts_with(HELLO_MAGIC));
    let mut r = FrameReader::new(&hello[HELLO_MAGIC.len()..]);
    let major = r.get_u16().unwrap();
    let minor = r.get_u16().unwrap();
    assert_eq!((major, minor), (ProtocolVersion::CURRENT.major, ProtocolVersion::CURRENT.minor));

    // Client hello: magic + major + minor + name.
    let mut body = Vec::new();
    body.extend_from_slice(HELLO_MAGIC);
    FrameWriter::new(&mut body).put_u16(major).put_u16(minor).put_str(b"test-client");
    write_frame(&mut client, &body);

    // Server asks for our screen info.
    let qinf = read_frame(&mut client);
    assert_eq!(&qinf[..4], &codes::QINF);

    // We answer with our geometry.
    let version = ProtocolVersion::new(major, minor);
    let info = Message::ScreenInfo {
        origin_x: 0,
        origin_y: 0,
        width: 1280,
        height: 1024,
        jump_zone: 1,
        cursor_x: 0,
        cursor_y: 0,
    };
    let mut buf = Vec::new();
    info.encode(version, &mut buf);
    write_frame(&mut client, &buf);

    // Server acknowledges; the handshake is complete from here.
    let ciak = read_frame(&mut client);
    assert_eq!(&ciak[..4], &codes::CIAK);

    handle.shutdown();
}

#[test]
fn a_client_that_never_sends_a_name_is_dropped_after_bad_magic() {
    let port = 28999;
    let cli = test_cli(port);
    let handle = switchlink_server::spawn(cli).expect("server spawns");
    thread::sleep(Duration::from_millis(100));

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("client connects");
    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    // Consume the server's hello so the read buffer is in a known state.
    let _ = read_frame(&mut client);

    // Send garbage instead of a valid handshake frame.
    write_frame(&mut client, b"not a hello at all");

    // The connection should be torn down rather than the server hanging;
    // further reads observe either an error message frame or EOF.
    let mut buf = [0u8; 1];
    let _ = client.read(&mut buf);

    handle.shutdown();
}
