use bllvm_resolver::module::{ModuleContainer, Resource, ResourceId, Version, VersionRange};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

/// `len` resources, each importing the package exported by the next
fn install_chain(container: &ModuleContainer, len: usize) -> Vec<ResourceId> {
    (0..len)
        .rev()
        .map(|i| {
            let mut builder = Resource::builder(&format!("chain.{}", i), Version::new(1, 0, 0))
                .export_package(&format!("pkg.{}", i), Version::new(1, 0, 0));
            if i + 1 < len {
                builder =
                    builder.import_package(&format!("pkg.{}", i + 1), VersionRange::default());
            }
            container.install(builder).unwrap().id
        })
        .collect()
}

/// One consumer over `width` libraries that all import a shared package,
/// offered by two providers in different versions
fn install_diamond(container: &ModuleContainer, width: usize) -> ResourceId {
    for v in [1, 2] {
        container
            .install(
                Resource::builder(&format!("base.{}", v), Version::new(v, 0, 0))
                    .export_package("base", Version::new(v, 0, 0)),
            )
            .unwrap();
    }
    let mut app = Resource::builder("app", Version::new(1, 0, 0))
        .import_package("base", VersionRange::parse("[1.0,2.0)").unwrap());
    for i in 0..width {
        container
            .install(
                Resource::builder(&format!("lib.{}", i), Version::new(1, 0, 0))
                    .export_package_uses(&format!("lib.{}", i), Version::new(1, 0, 0), &["base"])
                    .import_package("base", VersionRange::default()),
            )
            .unwrap();
        app = app.import_package(&format!("lib.{}", i), VersionRange::default());
    }
    container.install(app).unwrap().id
}

fn benchmark_resolve_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_chain");
    for len in [10usize, 50, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter_batched(
                || {
                    let container = ModuleContainer::default();
                    let ids = install_chain(&container, len);
                    (container, ids)
                },
                |(container, ids)| {
                    black_box(container.resolve(&ids).unwrap());
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn benchmark_resolve_diamond(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_diamond");
    for width in [4usize, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter_batched(
                || {
                    let container = ModuleContainer::default();
                    let app = install_diamond(&container, width);
                    (container, app)
                },
                |(container, app)| {
                    black_box(container.resolve(&[app]).unwrap());
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn benchmark_resolve_idempotent(c: &mut Criterion) {
    let container = ModuleContainer::default();
    let ids = install_chain(&container, 100);
    container.resolve(&ids).unwrap();

    c.bench_function("resolve_already_resolved", |b| {
        b.iter(|| {
            black_box(container.resolve(black_box(&ids)).unwrap());
        })
    });
}

criterion_group!(
    benches,
    benchmark_resolve_chain,
    benchmark_resolve_diamond,
    benchmark_resolve_idempotent
);
criterion_main!(benches);
