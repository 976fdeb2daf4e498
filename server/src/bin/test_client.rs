use shared::{Message, MessageType, PROTOCOL_VERSION};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

fn request(kind: &str, headers: &[(&str, &str)]) -> String {
    let mut out = format!("{} {} 0\r\n", PROTOCOL_VERSION, kind);
    for (key, value) in headers {
        out.push_str(&format!("{}: {}\r\n", key, value));
    }
    out.push_str("\r\n");
    out
}

async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<Message> {
    let mut chunk = [0u8; 2048];
    loop {
        match Message::parse(buf) {
            Ok(Some((msg, consumed))) => {
                buf.drain(..consumed);
                return Some(msg);
            }
            Ok(None) => {}
            Err(e) => {
                println!("Failed to parse server frame: {}", e);
                return None;
            }
        }
        match stream.read(&mut chunk).await {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                println!("Read error: {}", e);
                return None;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect("127.0.0.1:8080").await?;
    println!("Connected to server from {}", stream.local_addr()?);

    let mut buf = Vec::new();

    // Connect as admin
    stream
        .write_all(request("CONNECT", &[("User-Type", "ADMIN")]).as_bytes())
        .await?;
    let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
    println!("CONNECT -> {}: {:?}", reply.kind, reply.body);

    // Authenticate with the built-in test account
    stream
        .write_all(
            request("AUTH", &[("Username", "admin"), ("Password", "admin123")]).as_bytes(),
        )
        .await?;
    let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
    println!("AUTH -> {}: {:?}", reply.kind, reply.body);

    if reply.kind != MessageType::ResponseOk {
        println!("Authentication failed, giving up");
        return Ok(());
    }

    // Drive the vehicle a bit
    for command in ["SPEED_UP", "SPEED_UP", "TURN_LEFT", "SLOW_DOWN"] {
        stream
            .write_all(request("COMMAND", &[("Command", command)]).as_bytes())
            .await?;
        let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
        println!("COMMAND {} -> {}: {:?}", command, reply.kind, reply.body);
        sleep(Duration::from_millis(200)).await;
    }

    // Ask for an immediate telemetry snapshot
    stream.write_all(request("GET_TELEMETRY", &[]).as_bytes()).await?;
    let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
    println!("GET_TELEMETRY -> {}:\n{}", reply.kind, reply.body.unwrap_or_default());

    // Who else is connected?
    stream.write_all(request("LIST_USERS", &[]).as_bytes()).await?;
    let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
    println!("LIST_USERS -> {}:\n{}", reply.kind, reply.body.unwrap_or_default());

    stream.write_all(request("DISCONNECT", &[]).as_bytes()).await?;
    let reply = read_frame(&mut stream, &mut buf).await.expect("no reply");
    println!("DISCONNECT -> {}: {:?}", reply.kind, reply.body);

    println!("Test client finished");
    Ok(())
}
