//! Proptest generators for fleetlink types.

use proptest::prelude::*;

use fleetlink_core::{
    message_type, Array, ArrayRecord, ConfigRecord, ConfigValue, Message, Metadata, NodeId,
    RecordDict, RunId,
};

/// Generate a registered node id (never the coordinator).
pub fn node_id() -> impl Strategy<Value = NodeId> {
    (1u64..=u64::MAX).prop_map(NodeId)
}

pub fn run_id() -> impl Strategy<Value = RunId> {
    any::<u64>()
}

/// Generate a scalar config value. Floats are finite so values compare equal.
pub fn config_value() -> impl Strategy<Value = ConfigValue> {
    prop_oneof![
        any::<bool>().prop_map(ConfigValue::Bool),
        any::<i64>().prop_map(ConfigValue::Int),
        (-1.0e9f64..1.0e9f64).prop_map(ConfigValue::Float),
        "[a-z0-9 ]{0,16}".prop_map(ConfigValue::Str),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(|b| ConfigValue::Bytes(b.into())),
    ]
}

pub fn config_record() -> impl Strategy<Value = ConfigRecord> {
    prop::collection::btree_map("[a-z][a-z_]{0,11}", config_value(), 0..6)
        .prop_map(|values| ConfigRecord { values })
}

/// Generate an array of `1..=max_chunks` chunks of `chunk_size` bytes or
/// fewer.
pub fn array(max_chunks: usize, chunk_size: usize) -> impl Strategy<Value = Array> {
    prop::collection::vec(any::<u8>(), 1..=max_chunks * chunk_size).prop_map(move |data| {
        let len = data.len() as u64;
        Array::with_chunk_size("u8", vec![len], "numpy.ndarray", data, chunk_size)
    })
}

pub fn array_record() -> impl Strategy<Value = ArrayRecord> {
    prop::collection::btree_map("[a-z]{1,8}", array(4, 64), 1..4)
        .prop_map(|arrays| ArrayRecord { arrays })
}

pub fn record_dict() -> impl Strategy<Value = RecordDict> {
    (array_record(), config_record()).prop_map(|(arrays, config)| {
        RecordDict::new()
            .with_arrays("parameters", arrays)
            .with_config("config", config)
    })
}

/// Parameters for generating an instruction message.
#[derive(Debug, Clone)]
pub struct MessageParams {
    pub run_id: RunId,
    pub dst: NodeId,
    pub message_type: &'static str,
    pub content: RecordDict,
}

impl Arbitrary for MessageParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            run_id(),
            node_id(),
            prop::sample::select(vec![
                message_type::TRAIN,
                message_type::EVALUATE,
                message_type::QUERY,
            ]),
            record_dict(),
        )
            .prop_map(|(run_id, dst, message_type, content)| MessageParams {
                run_id,
                dst,
                message_type,
                content,
            })
            .boxed()
    }
}

/// Build the message described by `params`, sent by the coordinator.
pub fn message_from_params(params: &MessageParams) -> Message {
    Message::new(
        Metadata::new(params.run_id, NodeId::COORDINATOR, params.dst, params.message_type)
            .with_created_at(1_700_000_000_000),
        params.content.clone(),
    )
}
