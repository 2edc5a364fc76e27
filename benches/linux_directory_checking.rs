use std::fs;

use criterion::{criterion_group, criterion_main, Criterion};
use fw2tar::carve::find_rootfs;

fn build_fixture() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("a/b/c");
    fs::create_dir_all(&root).unwrap();
    for name in ["bin", "etc", "dev", "home", "lib", "usr", "var"] {
        fs::create_dir(root.join(name)).unwrap();
    }
    for i in 0..20 {
        fs::write(root.join(format!("file_{i}.bin")), b"x").unwrap();
    }
    dir
}

fn bench_find_rootfs(c: &mut Criterion) {
    let fixture = build_fixture();

    c.bench_function("find_rootfs/single_child_collapse", |b| {
        b.iter(|| find_rootfs(fixture.path(), true))
    });
}

criterion_group!(benches, bench_find_rootfs);
criterion_main!(benches);
