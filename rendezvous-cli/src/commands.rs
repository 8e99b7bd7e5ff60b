//! Subcommand implementations

use console::style;
use rendezvous_memory::shm::SharedPage;
use rendezvous_memory::{
    FlagState, HandshakeConfig, HandshakeReport, Initiator, Responder, Result,
};
use std::sync::atomic::Ordering;
use std::thread;

pub fn initiate(name: &str, config: HandshakeConfig) -> Result<()> {
    let initiator = Initiator::create(name, config)?;
    println!(
        "{} created '{}', waiting for responder",
        style("→").cyan(),
        style(initiator.namespace()).green()
    );
    let report = initiator.run()?;
    print_report(&report);
    Ok(())
}

pub fn respond(name: &str, config: HandshakeConfig) -> Result<()> {
    let responder = Responder::connect_wait(name, config)?;
    println!(
        "{} connected to '{}', flag is {}",
        style("→").cyan(),
        style(responder.namespace()).green(),
        responder.flag_state()
    );
    let report = responder.run()?;
    print_report(&report);
    Ok(())
}

pub fn selftest(rounds: u32, config: HandshakeConfig) -> Result<()> {
    let name = format!("selftest_{}", std::process::id());
    let initiator = Initiator::create(&name, config)?;
    let responder = Responder::connect(&name, config)?;

    for round in 1..=rounds {
        let (r0, r1) = thread::scope(|s| {
            let side1 = s.spawn(|| responder.run());
            let r0 = initiator.run();
            let r1 = side1
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (r0, r1)
        });
        let (r0, r1) = (r0?, r1?);

        println!(
            "{} round {}/{}: {} in {:?}",
            style("✓").green(),
            round,
            rounds,
            r0.flag,
            r0.elapsed.max(r1.elapsed)
        );

        responder.reset();
        initiator.reset();
    }

    println!("{}", style("✅ Self-test passed").green().bold());
    Ok(())
}

pub fn inspect(name: &str, config: HandshakeConfig) -> Result<()> {
    let page = SharedPage::open(name, config.layout.stride())?;
    let raw = page.flag().load(Ordering::Acquire);
    println!(
        "{}: flag 0x{:08X} ({})",
        style(page.name()).green(),
        raw,
        style(FlagState::from_raw(raw)).bold()
    );
    Ok(())
}

pub fn reset(name: &str, config: HandshakeConfig) -> Result<()> {
    let page = SharedPage::open(name, config.layout.stride())?;
    page.flag().store(FlagState::Empty.raw(), Ordering::Release);
    println!("{} flag of '{}' reset to EMPTY", style("✓").green(), page.name());
    Ok(())
}

fn print_report(report: &HandshakeReport) {
    println!("{}", style("═══════════════════════════════════════════").cyan());
    println!("   Side:     {}", style(report.side).green());
    println!("   Flag:     {}", style(report.flag).green());
    println!(
        "   Payload:  {}",
        style(format!("0x{:08X} 0x{:08X}", report.payload[0], report.payload[1])).green()
    );
    println!("   Polls:    {}", style(report.polls).green());
    println!("   Elapsed:  {}", style(format!("{:?}", report.elapsed)).green());
    println!("{}", style("═══════════════════════════════════════════").cyan());
}
