use core::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use synthd_core::{Mode, one, prepare};

fn bench_one(c: &mut Criterion) {
    let schema = json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "format": "uuid" },
            "name": { "type": "string", "minLength": 4, "maxLength": 24 },
            "age": { "type": "integer", "minimum": 0, "maximum": 120 },
            "score": { "type": "number", "minimum": 0, "maximum": 1 },
            "active": { "type": "boolean" },
            "tags": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": 5
            },
            "address": {
                "type": "object",
                "properties": {
                    "street": { "type": "string" },
                    "zip": { "type": "string", "minLength": 5, "maxLength": 5 }
                }
            }
        },
        "required": ["id", "name"]
    });

    let mut group = c.benchmark_group("generate");
    group.throughput(Throughput::Elements(1));

    for (label, mode, fuzz) in [
        ("strict", Mode::Strict, false),
        ("fuzz", Mode::Fuzz, true),
    ] {
        let prepared = prepare(&schema, mode);
        group.bench_function(label, |b| {
            let mut rng = rand::rng();
            b.iter(|| black_box(one(&prepared, fuzz, &mut rng)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_one);
criterion_main!(benches);
