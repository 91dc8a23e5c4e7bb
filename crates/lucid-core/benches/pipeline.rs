use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use lucid_core::{Discourse, EngineConfig, Lexicon, Session, compile};

const NAMES: [&str; 5] = ["Alice", "Bob", "Tom", "Mary", "Peter"];

fn bench_compile(c: &mut Criterion) {
    let lexicon = Lexicon::builtin().unwrap();
    let discourse = Discourse::default();
    let mut group = c.benchmark_group("compile");
    for text in [
        "A farmer owns a donkey.",
        "Every farmer who owns a donkey beats it.",
        "If the income of a person is less than 20000 then he is eligible.",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(text.len()), &text, |b, text| {
            b.iter(|| compile(text, &lexicon, &discourse).unwrap());
        });
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    for people in [5, 50, 200] {
        let session = Session::new(Lexicon::builtin().unwrap(), EngineConfig::default());
        session
            .assert("Every person who knows a person who is famous is famous.", "bench")
            .unwrap();
        session.assert("Alice is famous.", "bench").unwrap();
        // A chain of acquaintances through anonymous people.
        for i in 0..people {
            let name = NAMES[i % NAMES.len()];
            session
                .assert(&format!("A person knows {name}. {name} is a person."), "bench")
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(people), &people, |b, _| {
            b.iter(|| session.query("How many people are famous?").unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_query);
criterion_main!(benches);
