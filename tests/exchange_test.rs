//! Tests for exchange negotiation and streaming.

mod common;

use std::sync::Arc;
use std::time::Duration;

use arrow::array::{Array, Int64Array};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use flight_core::exchange::{InputRequirement, OutputRule, SessionState};
use flight_core::{
    BatchStream, ExchangeDescriptor, Exchanger, ExchangerDefinition, FlightError, Named, ServerConfig,
};

/// How one exchange's input ended: the batch count on a clean end, or the
/// error that cut it short.
type Ending = Result<usize, FlightError>;

/// Drains its whole input, records how it ended and emits nothing.
struct InputRecorder {
    descriptor: ExchangeDescriptor,
    endings: Arc<Mutex<Vec<Ending>>>,
}

impl InputRecorder {
    fn register(harness: &common::Harness) -> Arc<Mutex<Vec<Ending>>> {
        let endings = Arc::new(Mutex::new(Vec::new()));
        harness.server.register_exchanger(Arc::new(Self {
            descriptor: ExchangeDescriptor {
                command: "record".into(),
                description: "Record how the input ended".into(),
                input: InputRequirement::Any,
                output: OutputRule::SameAsInput,
            },
            endings: endings.clone(),
        }));
        endings
    }
}

impl Named for InputRecorder {
    fn name(&self) -> &str {
        &self.descriptor.command
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }
}

impl Exchanger for InputRecorder {
    fn descriptor(&self) -> &ExchangeDescriptor {
        &self.descriptor
    }

    fn transform(&self, _input_schema: SchemaRef, _output_schema: SchemaRef, mut input: BatchStream) -> BatchStream {
        let endings = self.endings.clone();
        stream::once(async move {
            let mut batches = 0;
            let ending = loop {
                match input.next().await {
                    Some(Ok(_)) => batches += 1,
                    Some(Err(e)) => break Err(e),
                    None => break Ok(batches),
                }
            };
            endings.lock().push(ending);
        })
        .filter_map(|()| async { None::<Result<RecordBatch, FlightError>> })
        .boxed()
    }
}

/// Wait until the server has released every call.
async fn wait_for_idle(harness: &common::Harness) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.server.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server kept the exchange open");
}

async fn register_echo(harness: &common::Harness) {
    harness
        .client
        .add_exchange(&ExchangerDefinition::Echo {
            command: "echo".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_echo_round_trip() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let input = common::numbers(1000, 100);
    let expected = concat_batches(&common::numbers_schema(), &input).unwrap();

    let (handle, reader) = harness
        .client
        .do_exchange_batches("echo", common::numbers_schema(), input)
        .await
        .unwrap();
    let output = reader.collect_batches().await.unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(output.len(), 1000);
    assert_eq!(summary.writes, 1000);
    assert_eq!(summary.reads, 1000);
    let rows: usize = output.iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 100_000);
    assert_eq!(concat_batches(&common::numbers_schema(), &output).unwrap(), expected);
}

#[tokio::test]
async fn test_schema_known_before_first_batch() {
    let harness = common::start().await;
    harness
        .client
        .add_exchange(&ExchangerDefinition::SumColumns {
            command: "sum".into(),
            inputs: vec!["a".into(), "b".into()],
            output: "total".into(),
            append: true,
        })
        .await
        .unwrap();

    // Input never produces anything, so no data can have arrived.
    let (handle, reader) = harness
        .client
        .do_exchange("sum", common::pairs_schema(), stream::pending().boxed())
        .await
        .unwrap();

    let schema = reader.schema();
    assert_eq!(schema.fields().len(), 3);
    assert_eq!(schema.field(2), &Field::new("total", DataType::Int64, true));
    let empty = reader.empty_batch();
    assert_eq!(empty.num_rows(), 0);
    assert_eq!(empty.schema(), schema);

    handle.cancel();
    drop(reader);
    assert!(handle.wait().await.is_err());
}

#[tokio::test]
async fn test_sum_columns_exchange() {
    let harness = common::start().await;
    harness
        .client
        .add_exchange(&ExchangerDefinition::SumColumns {
            command: "sum".into(),
            inputs: vec!["a".into(), "b".into()],
            output: "total".into(),
            append: true,
        })
        .await
        .unwrap();

    let input = vec![
        common::pairs_batch(vec![1, 2], vec![10, 20]),
        common::pairs_batch(vec![3], vec![30]),
    ];
    let (handle, reader) = harness
        .client
        .do_exchange_batches("sum", common::pairs_schema(), input)
        .await
        .unwrap();
    let output = reader.read_all().await.unwrap();
    handle.wait().await.unwrap();

    let total = output
        .column_by_name("total")
        .unwrap()
        .as_any()
        .downcast_ref::<Int64Array>()
        .unwrap();
    assert_eq!(total.len(), 3);
    assert_eq!(total.values().to_vec(), vec![11, 22, 33]);
}

#[tokio::test]
async fn test_output_only_at_end_of_input() {
    let harness = common::start().await;
    harness
        .client
        .add_exchange(&ExchangerDefinition::Concat {
            command: "concat".into(),
        })
        .await
        .unwrap();

    let (handle, reader) = harness
        .client
        .do_exchange_batches("concat", common::numbers_schema(), common::numbers(10, 5))
        .await
        .unwrap();
    let output = reader.collect_batches().await.unwrap();
    let summary = handle.wait().await.unwrap();

    assert_eq!(output.len(), 1);
    assert_eq!(output[0].num_rows(), 50);
    assert_eq!(summary.writes, 10);
    assert_eq!(summary.reads, 1);
}

#[tokio::test]
async fn test_unknown_command_is_not_found() {
    let harness = common::start().await;
    let err = harness.client.query_exchange("bogus").await.unwrap_err();
    assert_eq!(err, FlightError::NotFound("Unknown exchange command: bogus".into()));

    let err = harness
        .client
        .do_exchange_batches("bogus", common::numbers_schema(), common::numbers(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::NotFound(_)));

    // The server keeps working.
    harness.client.health_check().await.unwrap();
}

#[tokio::test]
async fn test_negotiation_is_idempotent() {
    let harness = common::start().await;
    harness
        .client
        .add_exchange(&ExchangerDefinition::Project {
            command: "only_b".into(),
            columns: vec!["b".into()],
        })
        .await
        .unwrap();

    let first = harness.client.query_exchange("only_b").await.unwrap();
    let second = harness.client.query_exchange("only_b").await.unwrap();
    assert_eq!(first, second);

    let input = common::pairs_schema();
    assert_eq!(
        first.negotiate(&input).unwrap(),
        second.negotiate(&input).unwrap()
    );
}

#[tokio::test]
async fn test_rejected_input_schema_is_invalid_argument() {
    let harness = common::start().await;
    harness
        .client
        .add_exchange(&ExchangerDefinition::Project {
            command: "only_b".into(),
            columns: vec!["b".into()],
        })
        .await
        .unwrap();

    let err = harness
        .client
        .do_exchange_batches("only_b", common::numbers_schema(), common::numbers(1, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, FlightError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_upload_failure_unblocks_consumer() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let input = stream::iter(common::numbers(5, 10).into_iter().map(Ok))
        .chain(stream::once(async {
            Err(FlightError::InvalidArgument("bad input".into()))
        }))
        .chain(stream::pending())
        .boxed();
    let (handle, mut reader) = harness
        .client
        .do_exchange("echo", common::numbers_schema(), input)
        .await
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        let mut last = None;
        while let Some(item) = reader.next().await {
            if let Err(e) = item {
                last = Some(e);
            }
        }
        last
    })
    .await
    .expect("consumer hung after upload failure");

    let expected = FlightError::InvalidArgument("bad input".into());
    assert_eq!(outcome, Some(expected.clone()));
    assert_eq!(handle.state(), SessionState::Failed);
    let waited = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("completion handle hung");
    assert_eq!(waited.unwrap_err(), expected);
}

#[tokio::test]
async fn test_cancel_stops_both_workers() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let input = stream::iter(common::numbers(3, 10).into_iter().map(Ok))
        .chain(stream::pending())
        .boxed();
    let (handle, mut reader) = harness
        .client
        .do_exchange("echo", common::numbers_schema(), input)
        .await
        .unwrap();

    for _ in 0..3 {
        reader.next().await.unwrap().unwrap();
    }
    handle.cancel();

    let next = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .expect("reader hung after cancel");
    assert!(matches!(next, Some(Err(FlightError::Cancelled(_)))));
    assert!(reader.next().await.is_none());

    let err = handle.wait().await.unwrap_err();
    assert_eq!(err, FlightError::Cancelled("exchange cancelled".into()));
}

#[tokio::test]
async fn test_dropping_reader_cancels_exchange() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let input = stream::iter(common::numbers(2, 10).into_iter().map(Ok))
        .chain(stream::pending())
        .boxed();
    let (handle, reader) = harness
        .client
        .do_exchange("echo", common::numbers_schema(), input)
        .await
        .unwrap();
    drop(reader);

    let err = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("exchange kept running without a reader")
        .unwrap_err();
    assert!(matches!(err, FlightError::Cancelled(_)));

    // The server side lets go of its slot once the client is gone.
    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.server.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server exchange leaked");
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let (handle, reader) = harness
        .client
        .do_exchange_batches("echo", common::numbers_schema(), common::numbers(2, 2))
        .await
        .unwrap();
    reader.collect_batches().await.unwrap();
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.cancel();
    assert_eq!(handle.state(), SessionState::Completed);
    assert!(handle.wait().await.is_ok());
}

#[tokio::test]
async fn test_slow_consumer_applies_backpressure() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let (handle, mut reader) = harness
        .client
        .do_exchange_batches("echo", common::numbers_schema(), common::numbers(200, 1))
        .await
        .unwrap();

    let mut seen = 0;
    while let Some(batch) = reader.next().await {
        batch.unwrap();
        seen += 1;
        if seen % 50 == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
    assert_eq!(seen, 200);
    assert_eq!(handle.wait().await.unwrap().reads, 200);
}

#[tokio::test]
async fn test_mismatched_input_batch_fails_session() {
    let harness = common::start().await;
    register_echo(&harness).await;

    let (handle, reader) = harness
        .client
        .do_exchange_batches(
            "echo",
            common::numbers_schema(),
            vec![common::pairs_batch(vec![1], vec![2])],
        )
        .await
        .unwrap();
    assert!(reader.collect_batches().await.is_err());
    assert!(matches!(
        handle.wait().await.unwrap_err(),
        FlightError::InvalidArgument(_)
    ));
}

#[tokio::test]
async fn test_exchange_limit_is_enforced() {
    let harness = common::start_with(ServerConfig {
        max_exchanges: 1,
        ..ServerConfig::default()
    })
    .await;
    register_echo(&harness).await;

    let held = stream::iter(common::numbers(1, 1).into_iter().map(Ok))
        .chain(stream::pending())
        .boxed();
    let (first, mut first_reader) = harness
        .client
        .do_exchange("echo", common::numbers_schema(), held)
        .await
        .unwrap();
    first_reader.next().await.unwrap().unwrap();

    let (second, second_reader) = harness
        .client
        .do_exchange_batches("echo", common::numbers_schema(), common::numbers(1, 1))
        .await
        .unwrap();
    let err = second_reader.collect_batches().await.unwrap_err();
    assert!(matches!(err, FlightError::Unavailable(_)));
    assert!(second.wait().await.is_err());

    first.cancel();
    drop(first_reader);
    let _ = first.wait().await;
}

#[tokio::test]
async fn test_failed_input_reaches_server_as_error() {
    let harness = common::start().await;
    let endings = InputRecorder::register(&harness);
    let expected = FlightError::InvalidArgument("bad input".into());

    for _ in 0..20 {
        let input = stream::iter(common::numbers(3, 10).into_iter().map(Ok))
            .chain(stream::once(async {
                Err(FlightError::InvalidArgument("bad input".into()))
            }))
            .chain(stream::pending())
            .boxed();
        let (handle, reader) = harness
            .client
            .do_exchange("record", common::numbers_schema(), input)
            .await
            .unwrap();

        assert_eq!(reader.collect_batches().await.unwrap_err(), expected);
        assert_eq!(handle.wait().await.unwrap_err(), expected);
        wait_for_idle(&harness).await;
    }

    let endings = endings.lock();
    assert_eq!(endings.len(), 20);
    assert!(endings.iter().all(|ending| ending == &Err(expected.clone())));
}

#[tokio::test]
async fn test_completed_input_reaches_server_as_clean_end() {
    let harness = common::start().await;
    let endings = InputRecorder::register(&harness);

    let (handle, reader) = harness
        .client
        .do_exchange_batches("record", common::numbers_schema(), common::numbers(4, 10))
        .await
        .unwrap();
    assert!(reader.collect_batches().await.unwrap().is_empty());
    assert_eq!(handle.wait().await.unwrap().writes, 4);
    wait_for_idle(&harness).await;

    assert_eq!(*endings.lock(), vec![Ok(4)]);
}

#[tokio::test]
async fn test_cancelled_exchange_never_ends_input_cleanly() {
    let harness = common::start().await;
    let endings = InputRecorder::register(&harness);

    let input = stream::iter(common::numbers(2, 10).into_iter().map(Ok))
        .chain(stream::pending())
        .boxed();
    let (handle, reader) = harness
        .client
        .do_exchange("record", common::numbers_schema(), input)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    drop(reader);
    assert!(matches!(handle.wait().await, Err(FlightError::Cancelled(_))));
    wait_for_idle(&harness).await;

    // Either the exchanger saw the abort or it was dropped mid-stream.
    assert!(endings.lock().iter().all(|ending| ending.is_err()));
}
