//! Observable execution handles.
//!
//! Every handle publishes a [`QueryState`] through a `tokio::sync::watch`
//! channel. [`QueryHandle`] starts executing as soon as it is created,
//! [`LazyQuery`] and [`Mutation`] only when triggered. All three must be
//! created inside a Tokio runtime.
//!
//! When executions of one handle overlap, only the most recently started one
//! publishes its outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value as Json;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::Client;
use crate::error::{SdkError, SdkResult};
use crate::local::LocalError;
use crate::options::ExecuteOptions;
use crate::typed::{TypedOperation, TypedResponse};
use crate::wire::GraphQLError;

/// The observable state of a handle.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    /// Data of the last successful execution.
    pub data: Option<T>,
    /// Server errors kept by the error policy.
    pub errors: Vec<GraphQLError>,
    pub local_errors: Vec<LocalError>,
    pub loading: bool,
    /// Error of the last execution, if it failed.
    pub error: Option<SdkError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            errors: Vec::new(),
            local_errors: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

impl<T> QueryState<T> {
    /// True once an execution has completed, successfully or not.
    pub fn is_settled(&self) -> bool {
        !self.loading && (self.data.is_some() || self.error.is_some())
    }
}

struct Shared<Op: TypedOperation> {
    client: Client,
    options: ExecuteOptions,
    variables: Mutex<Option<Json>>,
    state: watch::Sender<QueryState<Op::Response>>,
    generation: AtomicU64,
}

impl<Op> Shared<Op>
where
    Op: TypedOperation,
    Op::Response: Clone,
{
    fn new(client: Client, options: ExecuteOptions, variables: Option<Json>, loading: bool) -> Arc<Self> {
        let (state, _) = watch::channel(QueryState {
            loading,
            ..QueryState::default()
        });
        Arc::new(Self {
            client,
            options,
            variables: Mutex::new(variables),
            state,
            generation: AtomicU64::new(0),
        })
    }

    async fn run(&self, variables: Json) -> SdkResult<TypedResponse<Op::Response>> {
        *self.variables.lock().await = Some(variables.clone());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.loading = true);

        let result = self.client.execute_value::<Op>(variables, &self.options).await;

        if self.generation.load(Ordering::SeqCst) == generation {
            self.state.send_modify(|state| {
                state.loading = false;
                match &result {
                    Ok(response) => {
                        state.data = response.data.clone();
                        state.errors = response.errors.clone();
                        state.local_errors = response.local_errors.clone();
                        state.error = None;
                    }
                    Err(err) => state.error = Some(err.clone()),
                }
            });
        } else {
            tracing::debug!(operation = Op::NAME, "discarding superseded result");
        }
        result
    }

    async fn rerun(&self) -> Option<SdkResult<TypedResponse<Op::Response>>> {
        let variables = self.variables.lock().await.clone()?;
        Some(self.run(variables).await)
    }
}

fn serialize_variables<V: serde::Serialize>(variables: &V) -> SdkResult<Json> {
    serde_json::to_value(variables)
        .map_err(|e| SdkError::serialize(format!("failed to serialize variables: {e}")))
}

/// An eagerly executed query.
///
/// Dropping the handle stops polling and cancels a request in flight.
pub struct QueryHandle<Op: TypedOperation> {
    shared: Arc<Shared<Op>>,
    receiver: watch::Receiver<QueryState<Op::Response>>,
    task: Option<JoinHandle<()>>,
    stop: Arc<Notify>,
}

impl<Op> QueryHandle<Op>
where
    Op: TypedOperation,
    Op::Response: Clone,
{
    fn start(client: Client, variables: Json, options: ExecuteOptions) -> Self {
        let skip = options.skip;
        let poll_interval = options.poll_interval.filter(|period| !period.is_zero());
        let shared = Shared::<Op>::new(client, options, Some(variables.clone()), !skip);
        let receiver = shared.state.subscribe();
        let stop = Arc::new(Notify::new());

        let task = (!skip).then(|| {
            let shared = shared.clone();
            let stopped = stop.clone();
            match poll_interval {
                Some(period) => tokio::spawn(async move {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        // Stopping only interrupts the wait between ticks.
                        tokio::select! {
                            biased;
                            () = stopped.notified() => break,
                            _ = interval.tick() => {}
                        }
                        // Outcomes are published through the state channel.
                        let _ = shared.rerun().await;
                    }
                    tracing::debug!(operation = Op::NAME, "polling stopped");
                }),
                None => tokio::spawn(async move {
                    let _ = shared.run(variables).await;
                }),
            }
        });

        Self {
            shared,
            receiver,
            task,
            stop,
        }
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> QueryState<Op::Response> {
        self.receiver.borrow().clone()
    }

    /// A new receiver of state updates.
    pub fn subscribe(&self) -> watch::Receiver<QueryState<Op::Response>> {
        self.shared.state.subscribe()
    }

    /// Waits for the next state update.
    pub async fn changed(&mut self) -> QueryState<Op::Response> {
        // The sender lives as long as `self`, so this cannot fail.
        let _ = self.receiver.changed().await;
        self.receiver.borrow_and_update().clone()
    }

    /// Waits until no execution is in flight.
    pub async fn settled(&mut self) -> QueryState<Op::Response> {
        if let Ok(state) = self.receiver.wait_for(|state| !state.loading).await {
            return state.clone();
        }
        self.state()
    }

    /// Executes the query again with the same variables.
    pub async fn refetch(&self) -> SdkResult<TypedResponse<Op::Response>> {
        match self.shared.rerun().await {
            Some(result) => result,
            None => Err(SdkError::internal("query handle has no variables")),
        }
    }

    /// Stops polling. An execution in flight still completes and publishes
    /// its outcome.
    pub fn stop_polling(&mut self) {
        self.stop.notify_one();
    }
}

impl<Op: TypedOperation> Drop for QueryHandle<Op> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// A query executed on demand.
pub struct LazyQuery<Op: TypedOperation> {
    shared: Arc<Shared<Op>>,
    receiver: watch::Receiver<QueryState<Op::Response>>,
}

impl<Op> LazyQuery<Op>
where
    Op: TypedOperation,
    Op::Response: Clone,
{
    fn new(client: Client, options: ExecuteOptions) -> Self {
        let shared = Shared::<Op>::new(client, options, None, false);
        let receiver = shared.state.subscribe();
        Self { shared, receiver }
    }

    /// Executes the query with `variables`.
    pub async fn trigger(&self, variables: Op::Variables) -> SdkResult<TypedResponse<Op::Response>> {
        self.shared.run(serialize_variables(&variables)?).await
    }

    /// Executes the query again with the last triggered variables; `None`
    /// if it was never triggered.
    pub async fn refetch(&self) -> Option<SdkResult<TypedResponse<Op::Response>>> {
        self.shared.rerun().await
    }

    pub fn state(&self) -> QueryState<Op::Response> {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<Op::Response>> {
        self.shared.state.subscribe()
    }

    pub fn called(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) > 0
    }
}

/// A mutation executed on demand.
pub struct Mutation<Op: TypedOperation> {
    shared: Arc<Shared<Op>>,
    receiver: watch::Receiver<QueryState<Op::Response>>,
}

impl<Op> Mutation<Op>
where
    Op: TypedOperation,
    Op::Response: Clone,
{
    fn new(client: Client, options: ExecuteOptions) -> Self {
        let shared = Shared::<Op>::new(client, options, None, false);
        let receiver = shared.state.subscribe();
        Self { shared, receiver }
    }

    /// Runs the mutation. It is never retried after the server has seen it.
    pub async fn mutate(&self, variables: Op::Variables) -> SdkResult<TypedResponse<Op::Response>> {
        self.shared.run(serialize_variables(&variables)?).await
    }

    pub fn state(&self) -> QueryState<Op::Response> {
        self.receiver.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueryState<Op::Response>> {
        self.shared.state.subscribe()
    }

    /// Clears the published state.
    pub fn reset(&self) {
        self.shared.state.send_replace(QueryState::default());
    }
}

impl Client {
    /// Starts executing a query and returns a handle observing it.
    ///
    /// With `poll_interval` set, the query is re-executed on that interval
    /// until the handle is dropped or polling is stopped. With `skip` set,
    /// nothing is executed.
    pub fn watch<Op>(&self, variables: Op::Variables, options: ExecuteOptions) -> SdkResult<QueryHandle<Op>>
    where
        Op: TypedOperation,
        Op::Response: Clone,
    {
        let variables = serialize_variables(&variables)?;
        Ok(QueryHandle::start(self.clone(), variables, options))
    }

    /// Returns a query that executes when triggered.
    pub fn lazy<Op>(&self, options: ExecuteOptions) -> LazyQuery<Op>
    where
        Op: TypedOperation,
        Op::Response: Clone,
    {
        LazyQuery::new(self.clone(), options)
    }

    /// Returns a mutation that executes when triggered.
    pub fn mutation<Op>(&self, options: ExecuteOptions) -> Mutation<Op>
    where
        Op: TypedOperation,
        Op::Response: Clone,
    {
        Mutation::new(self.clone(), options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use crate::options::FetchPolicy;
    use crate::transport::Transport;
    use crate::typed::NoVariables;
    use crate::wire::{Request, Response};
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Answers after a delay and counts requests.
    struct SlowTransport {
        delay: Duration,
        sent: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Transport for SlowTransport {
        async fn send(&self, _request: &Request) -> SdkResult<Response> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Response::data(json!({ "clock": "12:00" })))
        }
    }

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct ClockData {
        clock: String,
    }

    crate::operation! {
        Clock: Query(NoVariables) -> ClockData = "query Clock { clock }";
    }

    fn client(delay: Duration, sent: Arc<AtomicUsize>) -> Client {
        Client::builder(ClientConfig::new("http://unused"))
            .operation::<Clock>()
            .transport(SlowTransport { delay, sent })
            .build()
            .expect("valid client")
    }

    #[tokio::test]
    async fn test_stop_polling_lets_request_in_flight_finish() {
        let sent = Arc::new(AtomicUsize::new(0));
        let client = client(Duration::from_millis(40), sent.clone());
        let options = ExecuteOptions::new()
            .poll_interval(Duration::from_millis(10))
            .fetch_policy(FetchPolicy::NetworkOnly);

        let mut handle = client.watch::<Clock>(NoVariables, options).unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(handle.state().loading);

        handle.stop_polling();
        let state = tokio::time::timeout(Duration::from_secs(1), handle.settled())
            .await
            .expect("settles after stopping");
        assert!(!state.loading);
        assert_eq!(state.data.unwrap().clock, "12:00");

        let polled = sent.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sent.load(Ordering::SeqCst), polled);
    }

    #[tokio::test]
    async fn test_stop_polling_without_interval_is_noop() {
        let sent = Arc::new(AtomicUsize::new(0));
        let client = client(Duration::from_millis(10), sent.clone());

        let mut handle = client.watch::<Clock>(NoVariables, ExecuteOptions::default()).unwrap();
        handle.stop_polling();

        let state = handle.settled().await;
        assert_eq!(state.data.unwrap().clock, "12:00");
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
