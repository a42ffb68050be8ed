use std::{net::SocketAddr, time::Duration};

use switchlink_io::{Reactor, ReactorEvent};

#[test]
fn server_echoes_a_framed_message_back_to_the_client() {
    let mut server = Reactor::new().unwrap();
    let addr: SocketAddr = "127.0.0.1:28991".parse().unwrap();
    let listener_token = server.listen_at(addr).unwrap();

    let mut client = Reactor::new().unwrap();
    let client_token = client.connect(addr).unwrap();

    let mut accepted_token = None;
    let mut received_on_server = Vec::new();
    let mut received_on_client = Vec::new();

    for _ in 0..200 {
        server
            .poll(Some(Duration::from_millis(20)), |ev| match ev {
                ReactorEvent::Accepted { listener, stream, .. } => {
                    assert_eq!(listener, listener_token);
                    accepted_token = Some(stream);
                }
                ReactorEvent::Frame { payload, .. } => received_on_server.extend_from_slice(payload),
                ReactorEvent::Closed { .. } => {}
            })
            .unwrap();

        if let Some(tok) = accepted_token {
            if received_on_server == b"ping" && received_on_client.is_empty() {
                server.write_or_enqueue_with(tok, |buf| buf.extend_from_slice(b"pong"));
            }
        }

        if accepted_token.is_some() && received_on_server.is_empty() {
            client.write_or_enqueue_with(client_token, |buf| buf.extend_from_slice(b"ping"));
        }

        client
            .poll(Some(Duration::from_millis(20)), |ev| {
                if let ReactorEvent::Frame { payload, .. } = ev {
                    received_on_client.extend_from_slice(payload);
                }
            })
            .unwrap();

        if received_on_client == b"pong" {
            break;
        }
    }

    assert_eq!(received_on_server, b"ping");
    assert_eq!(received_on_client, b"pong");
}
