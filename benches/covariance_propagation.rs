use criterion::{black_box, criterion_group, criterion_main, Criterion};

use astrotap::astrometry::covariance::{AstrometricParam, CovarianceBuilder};
use astrotap::astrometry::frames::icrs_frame_from_row;
use astrotap::astrometry::registry::DerivedRegistry;
use astrotap::table::{Column, DataType, Table, Value};

const COLUMNS: [&str; 21] = [
    "ra",
    "dec",
    "parallax",
    "pmra",
    "pmdec",
    "ra_error",
    "dec_error",
    "parallax_error",
    "pmra_error",
    "pmdec_error",
    "ra_dec_corr",
    "ra_parallax_corr",
    "dec_parallax_corr",
    "ra_pmra_corr",
    "ra_pmdec_corr",
    "dec_pmra_corr",
    "dec_pmdec_corr",
    "parallax_pmra_corr",
    "parallax_pmdec_corr",
    "pmra_pmdec_corr",
    "radial_velocity",
];

/// Deterministic catalog of `n` sources spread over the sky.
fn catalog(n: usize) -> Table {
    let rows = (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let values = [
                360.0 * t,
                -80.0 + 160.0 * ((7 * i) % n) as f64 / n as f64,
                0.2 + 5.0 * t,
                -10.0 + 20.0 * t,
                8.0 - 12.0 * t,
                0.05,
                0.04,
                0.08,
                0.1,
                0.09,
                0.1,
                -0.2,
                0.05,
                0.02,
                -0.03,
                0.01,
                0.04,
                0.3,
                -0.1,
                0.15,
                -20.0 + 40.0 * t,
            ];
            values.into_iter().map(Value::from).collect()
        })
        .collect();
    let columns = COLUMNS
        .iter()
        .map(|c| Column::new(*c, DataType::Double))
        .collect();
    Table::new(columns, rows).unwrap()
}

fn bench_covariance(c: &mut Criterion) {
    let table = catalog(10_000);
    let builder = CovarianceBuilder::new(&[
        AstrometricParam::Parallax,
        AstrometricParam::Pmra,
        AstrometricParam::Pmdec,
    ]);

    c.bench_function("covariance/build_all_3x3", |b| {
        b.iter(|| builder.build_all(black_box(&table)).unwrap())
    });
}

fn bench_registry(c: &mut Criterion) {
    let table = catalog(10_000);
    let registry = DerivedRegistry::with_defaults();

    c.bench_function("registry/vtan_error", |b| {
        b.iter(|| registry.compute("vtan_error", black_box(&table)).unwrap())
    });
}

fn bench_frames(c: &mut Criterion) {
    // the 6×6 path needs a radial velocity error
    let table = catalog(2_000);
    let table = table
        .with_f64_column("radial_velocity_error", vec![1.5; table.num_rows()])
        .unwrap();

    c.bench_function("frames/icrs_to_galactic_6d", |b| {
        b.iter(|| {
            table
                .iter_rows()
                .map(|row| icrs_frame_from_row(&row).unwrap().to_galactic())
                .count()
        })
    });
}

criterion_group!(benches, bench_covariance, bench_registry, bench_frames);
criterion_main!(benches);
