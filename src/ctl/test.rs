use std::sync::Arc;

use super::{ErrorCode, Op, Reply, Request, Server};
use crate::cache::{Volume, ROOT_INO};
use crate::config::{EventKind, Interest};
use crate::registry::Framework;

fn server() -> (Server, Arc<Volume>) {
    let fw = Arc::new(Framework::new());
    let vol = Volume::new("data");
    let mut server = Server::new(fw);
    server.mount("/mnt/data", Arc::clone(&vol));
    (server, vol)
}

fn code(reply: Reply) -> ErrorCode {
    match reply {
        Reply::Error { code, .. } => code,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[test]
fn test_request_wire_format() {
    let frame = serde_json::to_string(&Request::Start { max_tasks: 4 }).unwrap();
    assert_eq!(frame, r#"{"cmd":"start","max_tasks":4}"#);

    let frame = serde_json::to_string(&Request::Cmd {
        id: 2,
        op: Op::Mark { idx: 100, count: 50 },
    })
    .unwrap();
    assert_eq!(frame, r#"{"cmd":"cmd","id":2,"op":{"op":"mark","idx":100,"count":50}}"#);

    let parsed: Request =
        serde_json::from_str(r#"{"cmd":"fetch","id":1,"max":512}"#).unwrap();
    assert!(matches!(parsed, Request::Fetch { id: 1, max: 512 }));
}

#[test]
fn test_offline_gate() {
    let (server, _vol) = server();

    assert_eq!(
        code(server.handle(Request::List)),
        ErrorCode::NotInitialized
    );
    assert_eq!(
        code(server.handle(Request::Stop)),
        ErrorCode::NotInitialized
    );

    assert!(matches!(
        server.handle(Request::Start { max_tasks: 4 }),
        Reply::Ok
    ));
    assert_eq!(
        code(server.handle(Request::Start { max_tasks: 4 })),
        ErrorCode::AlreadyExists
    );
}

#[test]
fn test_command_round_trip() {
    let (server, vol) = server();
    let sub = vol.mkdir(ROOT_INO, "sub").unwrap();
    let file = vol.create(sub, "f").unwrap();

    assert!(matches!(
        server.handle(Request::Start { max_tasks: 4 }),
        Reply::Ok
    ));

    let mut interest = Interest::default();
    interest.exists = true;
    let id = match server.handle(Request::Register {
        name: "backup".into(),
        mask: interest.as_mask(),
        granularity: 1,
        path: "/mnt/data/sub".into(),
    }) {
        Reply::Registered { id } => id,
        other => panic!("register failed: {other:?}"),
    };

    // Registration under an unmounted path, a missing dir, and a file.
    assert_eq!(
        code(server.handle(Request::Register {
            name: "x".into(),
            mask: 0,
            granularity: 1,
            path: "/mnt/elsewhere".into(),
        })),
        ErrorCode::NotFound
    );
    assert_eq!(
        code(server.handle(Request::Register {
            name: "x".into(),
            mask: 0,
            granularity: 1,
            path: "/mnt/data/nope".into(),
        })),
        ErrorCode::NotFound
    );
    assert_eq!(
        code(server.handle(Request::Register {
            name: "x".into(),
            mask: 0,
            granularity: 1,
            path: "/mnt/data/sub/f".into(),
        })),
        ErrorCode::InvalidArgument
    );

    // Feed one event through the framework and fetch it back.
    let page = vol.insert_page(file, 9).unwrap();
    server.fw.hook(EventKind::Added, &page);

    match server.handle(Request::Fetch { id, max: 10 }) {
        Reply::Events { events } => {
            assert_eq!(events.len(), 1);
            assert_eq!((events[0].ino, events[0].index), (file, 9));
        }
        other => panic!("fetch failed: {other:?}"),
    }

    // Progress bookkeeping.
    assert!(matches!(
        server.handle(Request::Cmd {
            id,
            op: Op::Mark { idx: 100, count: 50 },
        }),
        Reply::Ok
    ));
    assert!(matches!(
        server.handle(Request::Cmd {
            id,
            op: Op::Check { idx: 100, count: 50 },
        }),
        Reply::Done { all_done: true }
    ));
    assert!(matches!(
        server.handle(Request::Cmd {
            id,
            op: Op::Unmark { idx: 120, count: 10 },
        }),
        Reply::Ok
    ));
    assert!(matches!(
        server.handle(Request::Cmd {
            id,
            op: Op::Check { idx: 100, count: 50 },
        }),
        Reply::Done { all_done: false }
    ));

    // Path resolution relative to the registered parent.
    match server.handle(Request::Cmd {
        id,
        op: Op::GetPath { ino: file },
    }) {
        Reply::Path { path } => assert_eq!(path.as_deref(), Some("f")),
        other => panic!("get_path failed: {other:?}"),
    }

    // Debug dumps come back as text.
    match server.handle(Request::Cmd { id, op: Op::PrintBit }) {
        Reply::Text { text } => assert!(text.contains("leaf 0")),
        other => panic!("print_bit failed: {other:?}"),
    }

    match server.handle(Request::List) {
        Reply::Tasks { tasks } => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].name, "backup");
            assert_eq!(tasks[0].id, id);
        }
        other => panic!("list failed: {other:?}"),
    }

    assert!(matches!(server.handle(Request::Deregister { id }), Reply::Ok));
    assert_eq!(
        code(server.handle(Request::Deregister { id })),
        ErrorCode::NotFound
    );
    assert!(matches!(server.handle(Request::Stop), Reply::Ok));
}

#[test]
fn test_garbage_frame_is_reported() {
    let (server, _vol) = server();

    let input = b"this is not json\n" as &[u8];
    let mut output = Vec::new();
    server.serve(input, &mut output).unwrap();

    let reply: Reply = serde_json::from_slice(&output).unwrap();
    assert_eq!(code(reply), ErrorCode::InvalidArgument);
}

#[cfg(unix)]
#[test]
fn test_client_over_socketpair() {
    use std::io::BufReader;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::Client;
    use crate::itree::InodeTree;

    let fw = Arc::new(Framework::new());
    let vol = Volume::new("data");
    let mut server = Server::new(Arc::clone(&fw));
    server.mount("/mnt/data", Arc::clone(&vol));

    let sub = vol.mkdir(ROOT_INO, "sub").unwrap();
    let file = vol.create(sub, "payload").unwrap();

    let (ours, theirs) = UnixStream::pair().unwrap();
    let serving = thread::spawn(move || {
        let reader = BufReader::new(theirs.try_clone().unwrap());
        server.serve(reader, theirs).unwrap();
    });

    let mut client = Client::new(BufReader::new(ours.try_clone().unwrap()), ours);

    client.start(4).unwrap();

    let mut interest = Interest::default();
    interest.exists = true;
    let id = client
        .register("sender", &interest, 1, "/mnt/data/sub")
        .unwrap();

    assert_eq!(
        client.fetch(42, 1).unwrap_err().kind(),
        std::io::ErrorKind::NotFound
    );

    client.mark(id, 0, 10).unwrap();
    assert!(client.check(id, 0, 10).unwrap());
    client.unmark(id, 0, 10).unwrap();
    assert!(!client.check(id, 0, 10).unwrap());

    assert_eq!(
        client.get_path(id, file).unwrap().as_deref(),
        Some("payload")
    );

    assert_eq!(client.list().unwrap()[0].name, "sender");
    assert!(client.print_index(id).unwrap().is_empty());

    // The client end also feeds the consumer-side inode tree.
    for i in 0..3 {
        let page = vol.insert_page(file, i).unwrap();
        fw.hook(EventKind::Added, &page);
    }

    let mut tree = InodeTree::new();
    tree.update(&mut client, id).unwrap();
    let hot = tree.fetch_hot(&mut client, id).unwrap().unwrap();
    assert_eq!((hot.ino, hot.pages, hot.path.as_str()), (file, 3, "payload"));

    client.deregister(id).unwrap();
    client.stop().unwrap();

    drop(client);
    serving.join().unwrap();
}
