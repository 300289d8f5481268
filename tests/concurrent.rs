use std::sync::Arc;

use stripefs::{EngineConfig, FileIo, MemoryStore, ObjectStore};

fn config() -> EngineConfig {
    EngineConfig {
        stripe_size: 8,
        lock_lease_secs: 2,
        lock_idle_secs: 1,
        ..EngineConfig::default()
    }
}

fn engine(store: &Arc<MemoryStore>, inode: &str) -> Arc<FileIo> {
    FileIo::new(Arc::clone(store) as Arc<dyn ObjectStore>, &config(), inode)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_never_shrink_the_size() {
    let store = Arc::new(MemoryStore::new());

    // Two clients racing in opposite orders; the CAS keeps the size at
    // the largest top offset either of them reached.
    let small_client = engine(&store, "ino");
    let large_client = engine(&store, "ino");

    let small = tokio::spawn(async move {
        small_client.write_sync(&[b'a'; 5], 0).await.unwrap();
    });
    let large = tokio::spawn(async move {
        large_client.write_sync(&[b'b'; 50], 0).await.unwrap();
    });
    small.await.unwrap();
    large.await.unwrap();

    let observer = engine(&store, "ino");
    assert_eq!(observer.size().await, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn size_grows_monotonically_under_many_writers() {
    let store = Arc::new(MemoryStore::new());
    let io = engine(&store, "ino");

    let mut writers = Vec::new();
    for top in 1..=16_u64 {
        let io = Arc::clone(&io);
        writers.push(tokio::spawn(async move {
            // Single-stripe writes share the lock and run concurrently.
            io.write_sync(&[top as u8], top - 1).await.unwrap();
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    assert_eq!(io.size().await, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unwritten_regions_inside_the_file_read_as_zeros() {
    let store = Arc::new(MemoryStore::new());
    let io = engine(&store, "ino");

    // Writers land on stripes 0 and 3, leaving holes at 1 and 2.
    let a = {
        let io = Arc::clone(&io);
        tokio::spawn(async move { io.write_sync(b"head", 0).await.unwrap() })
    };
    let b = {
        let io = Arc::clone(&io);
        tokio::spawn(async move { io.write_sync(b"tail", 28).await.unwrap() })
    };
    a.await.unwrap();
    b.await.unwrap();

    let mut buf = [0xff_u8; 32];
    assert_eq!(io.read(&mut buf, 0).await.unwrap(), 32);
    let mut expected = b"head".to_vec();
    expected.resize(28, 0);
    expected.extend_from_slice(b"tail");
    assert_eq!(buf.to_vec(), expected);
}
