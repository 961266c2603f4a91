//! Benchmarks for stream-json event classification.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::executor::block_on;
use futures::StreamExt;
use serde_json::Value;
use webtestflow::executor::ExpectedOutput;
use webtestflow::messages::{classify, interpret, StreamAnalyzer};
use webtestflow::testing::claude_events;

fn transcript(turns: usize) -> Vec<Value> {
    let mut events = Vec::with_capacity(turns * 3 + 1);
    for i in 0..turns {
        events.push(claude_events::text(&format!("Inspecting page {i} of the shop.")));
        events.push(claude_events::tool_use(
            &format!("read-{i}"),
            "Read",
            serde_json::json!({"file_path": format!("pages/{i}.html")}),
        ));
        if i % 10 == 0 {
            events.push(claude_events::tool_error(&format!("read-{i}"), "file not found"));
        }
    }
    events.push(claude_events::write_tool_use(
        "write-final",
        "website-analysis.json",
        r#"{"schema_version":1,"pages":[]}"#,
    ));
    events.push(claude_events::result_success("Analysis saved."));
    events
}

fn classify_benchmark(c: &mut Criterion) {
    let events = transcript(200);
    c.bench_function("classify_transcript", |b| {
        b.iter(|| {
            events
                .iter()
                .map(|raw| classify(black_box(raw)).len())
                .sum::<usize>()
        })
    });
}

fn analyze_benchmark(c: &mut Criterion) {
    let events = transcript(200);
    c.bench_function("interpret_and_analyze", |b| {
        b.iter(|| {
            let raw = futures::stream::iter(events.clone().into_iter().map(Ok)).boxed();
            let mut analyzer = StreamAnalyzer::new(
                "/w",
                ExpectedOutput::File("/w/website-analysis.json".into()),
            );
            block_on(interpret(raw).for_each(|event| {
                if let Ok(event) = event {
                    analyzer.observe(&event);
                }
                futures::future::ready(())
            }));
            black_box(analyzer.finish())
        })
    });
}

criterion_group!(benches, classify_benchmark, analyze_benchmark);
criterion_main!(benches);
