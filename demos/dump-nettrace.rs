//! Dumps a `.nettrace` file's events to stdout. Grounded on
//! `eventpipe-rs/examples/dump-nettrace.rs`'s simple open-parse-iterate
//! shape, adapted to this crate's whole-stream `parse()` entry point.

use anyhow::Context;
use nettrace::{ParseOptions, Trace};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .context("usage: dump-nettrace <path-to.nettrace>")?;
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("opening {path}"))?;

    let trace = nettrace::parse(file, ParseOptions::default(), None)
        .await
        .context("parsing .nettrace stream")?;

    print_summary(&trace);
    Ok(())
}

fn print_summary(trace: &Trace) {
    println!(
        "process {} on {} processors, {} event types, {} events",
        trace.trace_object.process_id,
        trace.trace_object.number_of_processors,
        trace.event_metadata().count(),
        trace.events.len()
    );

    for event in &trace.events {
        if event.metadata.provider_name == "Microsoft-DotNETCore-SampleProfiler" {
            continue;
        }
        println!(
            "{:>12}ns {}/{} (seq {})",
            event.time_stamp_ns, event.metadata.provider_name, event.metadata.event_name, event.sequence_number
        );
        if let Some(known) = &event.known {
            println!("  known: {known:?}");
        }
        let frames = trace.stack_trace(event);
        for frame in frames {
            println!("    at {}.{} (0x{:x})", frame.method.namespace, frame.method.name, frame.address);
        }
    }
}
