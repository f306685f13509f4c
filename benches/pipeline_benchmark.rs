use brachion::classify::classify_pathway;
use brachion::quality::QualityGate;
use brachion::reference::LmsTable;
use brachion::types::{Appetite, Measurement, Sex};
use brachion::zscore::compute_zscore;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::path::Path;

fn full_record_pipeline(c: &mut Criterion) {
    let table = LmsTable::from_tsv_path(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("data/acfa-lms.tsv"),
    )
    .unwrap();
    let gate = QualityGate::rule_based();
    let measurement = Measurement {
        age_months: 24,
        sex: Sex::Male,
        muac_mm: 114,
        edema: 0,
        appetite: Appetite::Good,
        danger_signs: false,
    };

    c.bench_function("quality_zscore_classify", |b| {
        b.iter(|| {
            let m = black_box(&measurement);
            let verdict = gate.check(m);
            let z = compute_zscore(m.muac_cm(), m.age_months, m.sex, &table).unwrap();
            let classification = classify_pathway(m, z);
            black_box((verdict, classification))
        })
    });
}

criterion_group!(benches, full_record_pipeline);
criterion_main!(benches);
