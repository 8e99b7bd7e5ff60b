//! Example Initiator (side 0)
//!
//! Creates the shared flag page, publishes MAP1 and waits for a responder
//! to acknowledge. Start `responder` with the same namespace in another
//! terminal.

use rendezvous_memory::{HandshakeConfig, Initiator};

fn main() {
    let namespace = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "rendezvous_demo".to_string());

    println!("╔══════════════════════════════════════════════════╗");
    println!("║          RendezvousMemory Initiator (side 0)     ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("[Initiator] Creating namespace: {}", namespace);

    let initiator = match Initiator::create(&namespace, HandshakeConfig::default()) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("[Initiator] Failed to create rendezvous: {}", e);
            std::process::exit(2);
        }
    };

    println!("[Initiator] Waiting for responder... (Ctrl+C to quit)");

    match initiator.run() {
        Ok(report) => {
            println!(
                "[Initiator] Handshake complete in {:?}: flag {}, payload {:08X} {:08X}",
                report.elapsed, report.flag, report.payload[0], report.payload[1]
            );
        }
        Err(e) => {
            eprintln!("[Initiator] Handshake failed: {}", e);
            std::process::exit(e.status_code());
        }
    }
}
