//! Stacks two real directories into one composite view and drives a few
//! operations through it, printing what happens at each step. Generalizes
//! the teacher's `examples/shadow_fs/main.rs` ("mirror a single directory
//! and print its root") into a two-layer union with a write that forces a
//! copy-up.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use mergefs::composite_mount::CompositeMount;
use mergefs::metadata_store::MetadataStore;
use mergefs::path::VirtualPath;
use mergefs::source::{AccessMode, Disposition, ShareMode, SourceMount};
use mergefs::sources::passthrough::PassthroughSource;

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let top = args.next().map(PathBuf::from).expect("usage: mirror_mount <writable-dir> <readonly-dir>");
    let bottom = args.next().map(PathBuf::from).expect("usage: mirror_mount <writable-dir> <readonly-dir>");

    let sources: Vec<Arc<dyn SourceMount>> = vec![
        Arc::new(PassthroughSource::new(top.clone(), true)),
        Arc::new(PassthroughSource::new(bottom.clone(), false)),
    ];
    let metadata = MetadataStore::new(top.clone(), ".mergefs.meta".to_owned());
    let mount = CompositeMount::new(sources, true, true, false, metadata, None);
    mount.start().await.expect("mount failed to start");
    println!("mounted {:?} over {:?}", top, bottom);

    let root = VirtualPath::root();
    let entries = mount.list_dir(&root).await.expect("list_dir failed");
    println!("root contains {} entries:", entries.len());
    for entry in &entries {
        println!("  {} (from source {})", entry.name, entry.source_rank);
    }

    let demo_path = VirtualPath::parse(r"\mirror_mount_demo.txt");
    let handle = mount
        .open(&demo_path, AccessMode::WriteOnly, ShareMode::default(), Disposition::CreateAlways)
        .await
        .expect("open failed");
    mount.write(handle, 0, b"written through the composite mount").await.expect("write failed");
    mount.close(handle).await.expect("close failed");
    println!("wrote {demo_path}");

    mount.unmount(true).await.expect("unmount failed");
}
