use codesync_collab::broadcast::{BroadcastGroup, ConnectionHandle};
use codesync_collab::patch::{apply_edit, EditDescriptor, EditRange};
use codesync_collab::protocol::{Frame, SyncMessage};
use codesync_collab::storage::{RocksSessionStore, SessionStore, StoreConfig};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use uuid::Uuid;

/// ~`lines`-line source file.
fn source_file(lines: usize) -> String {
    (0..lines)
        .map(|i| format!("    let value_{i} = compute({i}, \"payload\");"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn bench_patch_small_doc(c: &mut Criterion) {
    let doc = source_file(50);
    let edit = EditDescriptor::new(EditRange::new(25, 9, 25, 14), "renamed");

    c.bench_function("patch_single_line_50_lines", |b| {
        b.iter(|| black_box(apply_edit(black_box(&doc), black_box(&edit))))
    });
}

fn bench_patch_large_doc(c: &mut Criterion) {
    let doc = source_file(10_000);
    let edit = EditDescriptor::new(EditRange::new(5_000, 5, 5_010, 5), "// folded\n");

    c.bench_function("patch_multi_line_10k_lines", |b| {
        b.iter(|| black_box(apply_edit(black_box(&doc), black_box(&edit))))
    });
}

fn bench_message_decode(c: &mut Criterion) {
    let edit = EditDescriptor::new(EditRange::caret(12, 4), "x");
    let text = SyncMessage::code_change(&edit).unwrap().encode().unwrap();

    c.bench_function("code_change_decode", |b| {
        b.iter(|| {
            let msg = SyncMessage::decode(black_box(&text)).unwrap();
            black_box(msg.edit().unwrap());
        })
    });
}

fn bench_user_list_encode(c: &mut Criterion) {
    let users: Vec<String> = (0..50).map(|i| format!("user{i}")).collect();

    c.bench_function("user_list_encode_50", |b| {
        b.iter(|| black_box(SyncMessage::user_list(users.iter().cloned()).to_frame().unwrap()))
    });
}

fn bench_broadcast_100_connections(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut group = BroadcastGroup::new();
                let mut receivers = Vec::new();
                for i in 0..100 {
                    let (handle, rx) = ConnectionHandle::new(format!("user{i}"), 16);
                    group.add(handle);
                    receivers.push(rx);
                }

                let frame = Frame::from(r#"{"type":"CODE_CHANGE_UPDATE","content":"{}"}"#);
                black_box(group.broadcast(black_box(&frame), None));
            });
        })
    });
}

fn bench_broadcast_1000_frames(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("broadcast_1000_frames_100_connections", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut group = BroadcastGroup::new();
                let mut receivers = Vec::new();
                for i in 0..100 {
                    let (handle, rx) = ConnectionHandle::new(format!("user{i}"), 1024);
                    group.add(handle);
                    receivers.push(rx);
                }

                for i in 0..1000u64 {
                    let frame = Frame::from(format!("{{\"type\":\"CHAT_MESSAGE\",\"n\":{i}}}"));
                    group.broadcast(black_box(&frame), None);
                }
            });
        })
    });
}

fn bench_session_save_load(c: &mut Criterion) {
    let dir = std::env::temp_dir().join(format!("codesync_bench_sessions_{}", Uuid::new_v4()));
    let store = RocksSessionStore::open(StoreConfig::for_testing(&dir)).unwrap();
    let doc = source_file(500);

    c.bench_function("session_save_500_lines", |b| {
        b.iter(|| black_box(store.save(black_box("bench"), &doc, "rust").unwrap()))
    });

    c.bench_function("session_load_500_lines", |b| {
        b.iter(|| black_box(store.load(black_box("bench")).unwrap()))
    });

    drop(store);
    let _ = std::fs::remove_dir_all(&dir);
}

criterion_group!(
    benches,
    bench_patch_small_doc,
    bench_patch_large_doc,
    bench_message_decode,
    bench_user_list_encode,
    bench_broadcast_100_connections,
    bench_broadcast_1000_frames,
    bench_session_save_load,
);
criterion_main!(benches);
