use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

use shared::{format_timestamp, parse_registration_ack, ChatPacket, MAX_DATAGRAM_LEN};

// Current wall-clock time as the 19-byte wire text
fn now_text() -> String {
    format_timestamp(chrono::Local::now().naive_local())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let username = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "smoke".to_string());

    // Create local socket
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);

    // Relay address
    let server_addr: SocketAddr = format!("127.0.0.1:{}", shared::DEFAULT_PORT).parse()?;

    // Register with an empty message body
    let hello = ChatPacket::new(username.as_str(), now_text(), "")?;
    println!("Registering as '{}' with {}", username, server_addr);
    socket.send_to(&hello.to_bytes(), server_addr).await?;

    // Buffer for receiving data
    let mut buf = [0u8; MAX_DATAGRAM_LEN];

    // Wait for the acknowledgment
    println!("Waiting for registration acknowledgment...");
    let (len, addr) = socket.recv_from(&mut buf).await?;
    println!("Received {} bytes from {}", len, addr);

    match parse_registration_ack(&buf[..len]) {
        Some(name) => println!("Registered as: {}", name),
        None => println!("Expected an acknowledgment but got: {:?}", &buf[..len]),
    }

    // Send a numbered message every second for 10 seconds, printing whatever
    // the relay forwards in between. The relay never echoes a message back to
    // its sender, so forwarded traffic only shows up when a second test
    // client is running.
    for i in 1..=10 {
        let packet = ChatPacket::new(
            username.as_str(),
            now_text(),
            format!("test message {}", i),
        )?;
        println!("Sending: {}", packet.message());
        socket.send_to(&packet.to_bytes(), server_addr).await?;

        match timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => match ChatPacket::from_bytes(&buf[..len]) {
                Ok(forwarded) => println!(
                    "[{}] {}: {}",
                    forwarded.timestamp(),
                    forwarded.username(),
                    forwarded.message()
                ),
                Err(e) => println!("Failed to decode forwarded packet: {}", e),
            },
            Ok(Err(e)) => println!("Error receiving forwarded packet: {}", e),
            Err(_) => println!("No forwarded traffic this second"),
        }

        sleep(Duration::from_secs(1)).await;
    }

    println!("Test client finished");

    Ok(())
}
