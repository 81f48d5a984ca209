// Property-based tests for request ids, call paths and transferable discovery

use farcall_core::transfer::transferables;
use farcall_core::{
    Buffer, Endpoint, EndpointEvent, Message, MessageChannel, Proxy, RequestIdAllocator, Response,
    Value, WireValue, BIND_MARKER,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,7}".prop_filter("bind is reserved", |s| s != BIND_MARKER)
}

fn tree() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".{0,12}".prop_map(Value::from),
        proptest::collection::vec(any::<u8>(), 0..16)
            .prop_map(|bytes| Value::from(Buffer::new(bytes))),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::from),
            proptest::collection::vec(("[a-z]{1,6}", inner), 0..6)
                .prop_map(|fields| fields.into_iter().collect::<Value>()),
        ]
    })
}

fn count_buffers(value: &Value) -> usize {
    match value {
        Value::Buffer(_) => 1,
        Value::Array(items) => items.iter().map(count_buffers).sum(),
        Value::Map(fields) => fields.values().map(count_buffers).sum(),
        _ => 0,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_request_ids_unique_per_allocator(instance in any::<u64>(), count in 1usize..500) {
        let allocator = RequestIdAllocator::with_instance(instance);
        let mut seen = HashSet::new();

        for n in 0..count {
            let id = allocator.allocate();
            prop_assert_eq!(id.as_str(), format!("{}-{}", instance, n));
            prop_assert!(seen.insert(id));
        }
        prop_assert_eq!(allocator.peek_next(), count as u64);
    }

    #[test]
    fn test_call_paths_never_cross_contaminate(
        first in proptest::collection::vec(segment(), 0..8),
        second in proptest::collection::vec(segment(), 1..8),
    ) {
        let rt = runtime();
        let (paths_first, paths_second) = rt.block_on(async {
            let (client, server) = MessageChannel::new().into_ports();
            let (tx, mut seen) = mpsc::unbounded_channel();
            let reply = server.clone();
            server.add_listener(Arc::new(move |event: &EndpointEvent| {
                if let EndpointEvent::Message(Message::Request(request)) = event {
                    let _ = tx.send(request.call_path.clone());
                    let response = Response::new(request.id.clone(), Value::Null.into());
                    let _ = reply.send(response.into(), vec![]);
                }
            }));
            server.activate();
            let proxy = Proxy::new(client);

            for segment in &first {
                proxy.get(segment.as_str());
            }
            proxy.call(vec![]).await.unwrap();
            let paths_first = seen.recv().await.unwrap();

            for segment in &second {
                proxy.get(segment.as_str());
            }
            proxy.resolve().await.unwrap();
            let paths_second = seen.recv().await.unwrap();
            (paths_first, paths_second)
        });

        prop_assert_eq!(paths_first, first);
        prop_assert_eq!(paths_second, second);
    }

    #[test]
    fn test_every_buffer_is_found_once(value in tree()) {
        // Each generated buffer owns a distinct allocation unless it is empty.
        let found = transferables([&value]);
        prop_assert!(found.len() <= count_buffers(&value));
        for (i, a) in found.iter().enumerate() {
            for b in &found[i + 1..] {
                prop_assert!(!a.same_handle(b));
            }
        }
    }

    #[test]
    fn test_structural_values_survive_a_channel(value in tree()) {
        let rt = runtime();
        let received = rt.block_on(async {
            let (a, b) = MessageChannel::new().into_ports();
            let (tx, mut rx) = mpsc::unbounded_channel();
            b.add_listener(Arc::new(move |event: &EndpointEvent| {
                if let EndpointEvent::Message(Message::Response(response)) = event {
                    let _ = tx.send(response.result.clone());
                }
            }));
            b.activate();
            let message: Message = Response::new("1-0".into(), value.clone().into()).into();
            let transfer = farcall_core::transfer::message_transferables(&message);
            a.send(message, transfer).unwrap();
            rx.recv().await.unwrap()
        });
        prop_assert_eq!(received, WireValue::Object(value));
    }
}
