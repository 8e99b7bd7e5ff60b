//! Example Responder (side 1)
//!
//! Connects to an initiator's flag page, waits for READY and acknowledges.

use rendezvous_memory::{HandshakeConfig, PollConfig, Responder};
use std::time::Duration;

fn main() {
    let namespace = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rendezvous_demo".to_string());

    println!("╔══════════════════════════════════════════════════╗");
    println!("║          RendezvousMemory Responder (side 1)     ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("[Responder] Connecting to namespace: {}", namespace);

    let config = HandshakeConfig {
        poll: PollConfig::spin().with_timeout(Duration::from_secs(30)),
        ..Default::default()
    };

    let responder = match Responder::connect_wait(&namespace, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("[Responder] Failed to connect: {}", e);
            eprintln!("[Responder] Make sure the initiator is running first!");
            std::process::exit(2);
        }
    };

    println!("[Responder] Connected, flag is {}", responder.flag_state());

    match responder.run() {
        Ok(report) => {
            println!(
                "[Responder] Acknowledged after {} polls: payload {:08X} {:08X}",
                report.polls, report.payload[0], report.payload[1]
            );
        }
        Err(e) => {
            eprintln!("[Responder] Handshake failed: {}", e);
            std::process::exit(e.status_code());
        }
    }
}
