//! The task queue and the step logic.
//!
//! Submissions land on an unbounded channel; a fixed pool of workers drains
//! it. A step that needs another try re-enqueues itself through a detached
//! timer task, and a mint that succeeds enqueues its transfer the same way,
//! only after the mint's success is committed to the ledger.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::{PipelineConfig, ROYALTY, ROYALTY_BASE};
use crate::ledger::{NewOperation, OperationKind, StatusLedger};
use crate::pipeline::status::{CollectionStatus, TaskStatus};
use crate::pipeline::task::{QueuedTask, RetryBudget, Task};
use crate::pipeline::{Notifier, PipelineError};
use crate::ton::address::TonAddress;
use crate::ton::builder::CollectionSpec;
use crate::ton::client::TonClient;
use crate::ton::connection::Connect;
use crate::tonapi::TransactionLookup;

/// What a submission did. Duplicates of live requests are ignored rather
/// than erroring; only the caller may restart a terminal operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Enqueued(i64),
    /// The same correlation id is already queued or running.
    Ignored(i64),
    /// A terminal operation was explicitly resubmitted with a fresh budget.
    Restarted(i64),
    /// The row already holds a terminal status that cannot restart.
    AlreadyDone(i64),
}

struct PipelineInner<C: Connect, L> {
    client: TonClient<C>,
    ledger: Arc<dyn StatusLedger>,
    lookup: L,
    notifier: Arc<dyn Notifier>,
    config: PipelineConfig,
}

pub struct Pipeline<C: Connect + 'static, L: TransactionLookup + 'static> {
    inner: Arc<PipelineInner<C, L>>,
    queue: UnboundedSender<QueuedTask>,
    workers: Vec<JoinHandle<()>>,
}

impl<C: Connect + 'static, L: TransactionLookup + 'static> Pipeline<C, L> {
    pub fn start(
        client: TonClient<C>,
        ledger: Arc<dyn StatusLedger>,
        lookup: L,
        notifier: Arc<dyn Notifier>,
        config: PipelineConfig,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(PipelineInner {
            client,
            ledger,
            lookup,
            notifier,
            config,
        });
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..inner.config.workers.max(1))
            .map(|_| {
                let inner = inner.clone();
                let receiver = receiver.clone();
                let weak_queue = queue.downgrade();
                tokio::spawn(worker_loop(inner, receiver, weak_queue))
            })
            .collect();
        Self {
            inner,
            queue,
            workers,
        }
    }

    /// Drops the queue and waits for the workers to drain it. Retries still
    /// sleeping on their delay are abandoned with a log line.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    pub fn mint_collection(
        &self,
        correlation_id: i64,
        author_id: i64,
        collection_content_uri: impl Into<String>,
        item_content_base_uri: impl Into<String>,
    ) -> Result<SubmitOutcome, PipelineError> {
        let task = Task::MintCollection {
            correlation_id,
            author_id,
            collection_content_uri: collection_content_uri.into(),
            item_content_base_uri: item_content_base_uri.into(),
        };
        self.submit_operation(
            correlation_id,
            NewOperation {
                id: Some(correlation_id),
                kind: OperationKind::MintCollection,
                author_id: Some(author_id),
                collection_address: None,
                nft_address: None,
                dest_wallet: None,
                item_meta: None,
            },
            task,
            self.mint_budget(),
        )
    }

    pub fn mint_item(
        &self,
        correlation_id: i64,
        author_id: i64,
        collection: TonAddress,
        dest_wallet: TonAddress,
        item_meta: impl Into<String>,
    ) -> Result<SubmitOutcome, PipelineError> {
        let item_meta = item_meta.into();
        let task = Task::MintItem {
            correlation_id,
            author_id,
            collection,
            dest_wallet,
            item_meta: item_meta.clone(),
        };
        self.submit_operation(
            correlation_id,
            NewOperation {
                id: Some(correlation_id),
                kind: OperationKind::MintItem,
                author_id: Some(author_id),
                collection_address: Some(collection),
                nft_address: None,
                dest_wallet: Some(dest_wallet),
                item_meta: Some(item_meta),
            },
            task,
            self.mint_budget(),
        )
    }

    pub fn transfer_item(
        &self,
        correlation_id: i64,
        nft: TonAddress,
        dest_wallet: TonAddress,
    ) -> Result<SubmitOutcome, PipelineError> {
        let task = Task::TransferItem {
            correlation_id,
            nft,
            dest_wallet,
        };
        self.submit_operation(
            correlation_id,
            NewOperation {
                id: Some(correlation_id),
                kind: OperationKind::TransferItem,
                author_id: None,
                collection_address: None,
                nft_address: Some(nft),
                dest_wallet: Some(dest_wallet),
                item_meta: None,
            },
            task,
            self.transfer_budget(),
        )
    }

    /// Confirms a transaction row against the lookup service. Terminal rows
    /// are left alone; a confirmed hash never flips.
    pub fn confirm_transaction(&self, transaction_id: i64) -> Result<SubmitOutcome, PipelineError> {
        let Some(transaction) = self.inner.ledger.transaction(transaction_id)? else {
            return Err(PipelineError::Ledger(crate::ledger::LedgerError::NotFound {
                entity: "transaction",
                id: transaction_id,
            }));
        };
        match transaction.status {
            TaskStatus::Pending => {
                info!(
                    "transaction {} is already being confirmed, ignoring duplicate",
                    transaction_id
                );
                return Ok(SubmitOutcome::Ignored(transaction_id));
            }
            status if status.is_terminal() => {
                info!(
                    "transaction {} already settled as {}, ignoring",
                    transaction_id, status
                );
                return Ok(SubmitOutcome::AlreadyDone(transaction_id));
            }
            _ => {}
        }
        self.enqueue(QueuedTask {
            task: Task::ConfirmTransaction { transaction_id },
            budget: self.transaction_budget(),
            dependency_budget: self.dependency_budget(),
        })?;
        Ok(SubmitOutcome::Enqueued(transaction_id))
    }

    fn submit_operation(
        &self,
        correlation_id: i64,
        record: NewOperation,
        task: Task,
        budget: RetryBudget,
    ) -> Result<SubmitOutcome, PipelineError> {
        let outcome = match self.inner.ledger.operation(correlation_id)? {
            Some(existing) if existing.status.is_terminal() => {
                info!(
                    "operation {} was {}, caller resubmitted it with a fresh budget",
                    correlation_id, existing.status
                );
                self.inner.ledger.reset_operation(correlation_id)?;
                SubmitOutcome::Restarted(correlation_id)
            }
            Some(_) => {
                info!(
                    "operation {} is already queued or running, ignoring duplicate submission",
                    correlation_id
                );
                return Ok(SubmitOutcome::Ignored(correlation_id));
            }
            None => {
                self.inner.ledger.insert_operation(&record)?;
                SubmitOutcome::Enqueued(correlation_id)
            }
        };
        self.enqueue(QueuedTask {
            task,
            budget,
            dependency_budget: self.dependency_budget(),
        })?;
        Ok(outcome)
    }

    fn enqueue(&self, task: QueuedTask) -> Result<(), PipelineError> {
        self.queue.send(task).map_err(|_| PipelineError::QueueClosed)
    }

    fn mint_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.inner.config.mint_attempts,
            self.inner.config.mint_retry_delay(),
        )
    }

    fn transfer_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.inner.config.transfer_attempts,
            self.inner.config.transfer_retry_delay(),
        )
    }

    fn transaction_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.inner.config.transaction_attempts,
            self.inner.config.transaction_retry_delay(),
        )
    }

    fn dependency_budget(&self) -> RetryBudget {
        RetryBudget::new(
            self.inner.config.dependency_wait_attempts,
            self.inner.config.dependency_wait_delay(),
        )
    }
}

async fn worker_loop<C: Connect, L: TransactionLookup>(
    inner: Arc<PipelineInner<C, L>>,
    receiver: Arc<Mutex<UnboundedReceiver<QueuedTask>>>,
    queue: WeakUnboundedSender<QueuedTask>,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        match next {
            Some(task) => inner.run_task(task, &queue).await,
            None => break,
        }
    }
}

/// Re-enqueues a task after its retry delay without blocking a worker.
fn schedule_retry(queue: &WeakUnboundedSender<QueuedTask>, task: QueuedTask) {
    let queue = queue.clone();
    let delay = task.budget.delay();
    tokio::spawn(async move {
        sleep(delay).await;
        let sent = queue.upgrade().is_some_and(|queue| queue.send(task).is_ok());
        if !sent {
            warn!("pipeline stopped before a scheduled retry could run");
        }
    });
}

fn schedule_dependency_retry(queue: &WeakUnboundedSender<QueuedTask>, task: QueuedTask) {
    let queue = queue.clone();
    let delay = task.dependency_budget.delay();
    tokio::spawn(async move {
        sleep(delay).await;
        let sent = queue.upgrade().is_some_and(|queue| queue.send(task).is_ok());
        if !sent {
            warn!("pipeline stopped before a dependency wait could resume");
        }
    });
}

impl<C: Connect, L: TransactionLookup> PipelineInner<C, L> {
    async fn run_task(&self, queued: QueuedTask, queue: &WeakUnboundedSender<QueuedTask>) {
        match &queued.task {
            Task::MintCollection { .. } => self.run_mint_collection(queued, queue).await,
            Task::MintItem { .. } => self.run_mint_item(queued, queue).await,
            Task::TransferItem { .. } => self.run_transfer_item(queued, queue).await,
            Task::ConfirmTransaction { .. } => self.run_confirm_transaction(queued, queue).await,
        }
    }

    /// One terminal status write plus one diagnostic; errors in the write
    /// itself can only be logged.
    fn finish_operation(&self, correlation_id: i64, status: TaskStatus) {
        let current = match self.ledger.operation(correlation_id) {
            Ok(Some(record)) => record.status,
            Ok(None) => {
                error!("operation {} vanished from the ledger", correlation_id);
                return;
            }
            Err(e) => {
                error!("could not read operation {}: {}", correlation_id, e);
                return;
            }
        };
        if current == TaskStatus::New && status != TaskStatus::Failed {
            // Success requires the row to have been claimed first.
            if let Err(e) = self
                .ledger
                .advance_operation_status(correlation_id, TaskStatus::Pending)
            {
                error!("could not claim operation {}: {}", correlation_id, e);
                return;
            }
        }
        if let Err(e) = self.ledger.advance_operation_status(correlation_id, status) {
            error!(
                "could not record {} for operation {}: {}",
                status, correlation_id, e
            );
        }
    }

    fn claim_operation(&self, correlation_id: i64) -> bool {
        match self
            .ledger
            .advance_operation_status(correlation_id, TaskStatus::Pending)
        {
            Ok(_) => true,
            Err(e) => {
                error!("could not claim operation {}: {}", correlation_id, e);
                false
            }
        }
    }

    async fn run_mint_collection(
        &self,
        queued: QueuedTask,
        queue: &WeakUnboundedSender<QueuedTask>,
    ) {
        let Task::MintCollection {
            correlation_id,
            author_id,
            collection_content_uri,
            item_content_base_uri,
        } = &queued.task
        else {
            return;
        };
        let (correlation_id, author_id) = (*correlation_id, *author_id);
        info!(
            "{}: attempt {}/{}",
            queued.task.describe(),
            queued.budget.attempt(),
            queued.budget.max_attempts()
        );

        let author = match self.ledger.author(author_id) {
            Ok(Some(author)) => author,
            Ok(None) => {
                error!("author {} not found, failing collection mint", author_id);
                self.finish_operation(correlation_id, TaskStatus::Failed);
                return;
            }
            Err(e) => {
                error!("could not load author {}: {}", author_id, e);
                return;
            }
        };

        match author.collection_status {
            CollectionStatus::Minted => {
                info!("collection for author {} is already minted", author_id);
                if self.claim_operation(correlation_id) {
                    self.finish_operation(correlation_id, TaskStatus::Success);
                }
                return;
            }
            CollectionStatus::Failed => {
                warn!(
                    "collection mint for author {} already failed permanently",
                    author_id
                );
                self.finish_operation(correlation_id, TaskStatus::Failed);
                return;
            }
            _ => {}
        }

        if !self.claim_operation(correlation_id) {
            return;
        }
        if let Err(e) = self
            .ledger
            .advance_collection_status(author_id, CollectionStatus::Pending)
        {
            error!(
                "could not mark the collection of author {} as pending: {}",
                author_id, e
            );
            return;
        }

        let spec = CollectionSpec {
            owner: self.client.wallet_address(),
            royalty_address: self.client.wallet_address(),
            royalty: *ROYALTY,
            royalty_base: *ROYALTY_BASE,
            collection_content_uri: collection_content_uri.clone(),
            item_content_base_uri: item_content_base_uri.clone(),
        };

        match self.client.deploy_collection(&spec).await {
            Ok((address, true)) => {
                if let Err(e) = self.ledger.set_collection_address(author_id, &address) {
                    error!(
                        "could not record the collection address for author {}: {}",
                        author_id, e
                    );
                }
                if let Err(e) = self
                    .ledger
                    .advance_collection_status(author_id, CollectionStatus::Minted)
                {
                    error!(
                        "could not mark the collection of author {} as minted: {}",
                        author_id, e
                    );
                    return;
                }
                self.finish_operation(correlation_id, TaskStatus::Success);
                info!("collection {} minted for author {}", address, author_id);
                self.notifier
                    .notify(author_id, "Your collection is live on-chain!");
            }
            Ok((address, false)) => {
                warn!(
                    "collection {} for author {} did not confirm",
                    address, author_id
                );
                self.retry_or_fail_collection(queued, queue, author_id, correlation_id);
            }
            Err(e) => {
                error!("collection mint for author {} errored: {}", author_id, e);
                self.retry_or_fail_collection(queued, queue, author_id, correlation_id);
            }
        }
    }

    fn retry_or_fail_collection(
        &self,
        queued: QueuedTask,
        queue: &WeakUnboundedSender<QueuedTask>,
        author_id: i64,
        correlation_id: i64,
    ) {
        match queued.budget.next_attempt() {
            Some(budget) => {
                info!(
                    "retrying {} in {:?} (attempt {}/{})",
                    queued.task.describe(),
                    budget.delay(),
                    budget.attempt(),
                    budget.max_attempts()
                );
                schedule_retry(queue, QueuedTask { budget, ..queued });
            }
            None => {
                error!(
                    "collection mint for author {} failed permanently after {} attempts",
                    author_id,
                    queued.budget.max_attempts()
                );
                if let Err(e) = self
                    .ledger
                    .advance_collection_status(author_id, CollectionStatus::Failed)
                {
                    error!(
                        "could not mark the collection of author {} as failed: {}",
                        author_id, e
                    );
                }
                self.finish_operation(correlation_id, TaskStatus::Failed);
                self.notifier
                    .notify(author_id, "Your collection could not be minted.");
            }
        }
    }

    async fn run_mint_item(&self, queued: QueuedTask, queue: &WeakUnboundedSender<QueuedTask>) {
        let Task::MintItem {
            correlation_id,
            author_id,
            collection,
            dest_wallet,
            item_meta,
        } = &queued.task
        else {
            return;
        };
        let (correlation_id, author_id) = (*correlation_id, *author_id);
        let (collection, dest_wallet) = (*collection, *dest_wallet);
        let item_meta = item_meta.clone();
        info!(
            "{}: attempt {}/{}",
            queued.task.describe(),
            queued.budget.attempt(),
            queued.budget.max_attempts()
        );

        let author = match self.ledger.author(author_id) {
            Ok(Some(author)) => author,
            Ok(None) => {
                error!("author {} not found, failing item mint", author_id);
                self.finish_operation(correlation_id, TaskStatus::Failed);
                return;
            }
            Err(e) => {
                error!("could not load author {}: {}", author_id, e);
                return;
            }
        };

        if !self.claim_operation(correlation_id) {
            return;
        }

        match author.collection_status {
            CollectionStatus::Minted => {}
            CollectionStatus::Failed => {
                warn!(
                    "collection for author {} failed, abandoning item mint {}",
                    author_id, correlation_id
                );
                self.finish_operation(correlation_id, TaskStatus::Failed);
                return;
            }
            _ => {
                // Waiting on a sibling pipeline, not on a transport error:
                // this burns the dependency budget, not the mint budget.
                match queued.dependency_budget.next_attempt() {
                    Some(dependency_budget) => {
                        info!(
                            "collection for author {} is still minting, requeueing item mint {} (wait {}/{})",
                            author_id,
                            correlation_id,
                            dependency_budget.attempt(),
                            dependency_budget.max_attempts()
                        );
                        schedule_dependency_retry(
                            queue,
                            QueuedTask {
                                dependency_budget,
                                ..queued
                            },
                        );
                    }
                    None => {
                        error!(
                            "gave up waiting for the collection of author {} after {} checks",
                            author_id,
                            queued.dependency_budget.max_attempts()
                        );
                        self.finish_operation(correlation_id, TaskStatus::Failed);
                        self.notifier
                            .notify(author_id, "Your NFT could not be minted.");
                    }
                }
                return;
            }
        }

        match self.client.deploy_item(&collection, &item_meta).await {
            Ok(Some(nft)) => {
                if let Err(e) = self.ledger.set_operation_nft_address(correlation_id, &nft) {
                    error!(
                        "could not record the item address for operation {}: {}",
                        correlation_id, e
                    );
                }
                // The transfer is enqueued only after the mint success is
                // durably recorded.
                self.finish_operation(correlation_id, TaskStatus::Success);
                info!(
                    "item {} minted for operation {}, queueing its transfer to {}",
                    nft, correlation_id, dest_wallet
                );
                let transfer_id = match self.ledger.insert_operation(&NewOperation {
                    id: None,
                    kind: OperationKind::TransferItem,
                    author_id: Some(author_id),
                    collection_address: Some(collection),
                    nft_address: Some(nft),
                    dest_wallet: Some(dest_wallet),
                    item_meta: None,
                }) {
                    Ok(id) => id,
                    Err(e) => {
                        error!(
                            "could not create the transfer operation for item {}: {}",
                            nft, e
                        );
                        return;
                    }
                };
                let transfer = QueuedTask {
                    task: Task::TransferItem {
                        correlation_id: transfer_id,
                        nft,
                        dest_wallet,
                    },
                    budget: RetryBudget::new(
                        self.config.transfer_attempts,
                        self.config.transfer_retry_delay(),
                    ),
                    dependency_budget: queued.dependency_budget,
                };
                let sent = queue
                    .upgrade()
                    .is_some_and(|queue| queue.send(transfer).is_ok());
                if !sent {
                    warn!(
                        "pipeline stopped before the transfer of item {} could be queued",
                        nft
                    );
                }
            }
            Ok(None) => {
                warn!("item mint {} did not confirm", correlation_id);
                self.retry_or_fail_item(queued, queue, author_id, correlation_id);
            }
            Err(e) => {
                error!("item mint {} errored: {}", correlation_id, e);
                self.retry_or_fail_item(queued, queue, author_id, correlation_id);
            }
        }
    }

    fn retry_or_fail_item(
        &self,
        queued: QueuedTask,
        queue: &WeakUnboundedSender<QueuedTask>,
        author_id: i64,
        correlation_id: i64,
    ) {
        match queued.budget.next_attempt() {
            Some(budget) => {
                info!(
                    "retrying {} in {:?} (attempt {}/{})",
                    queued.task.describe(),
                    budget.delay(),
                    budget.attempt(),
                    budget.max_attempts()
                );
                schedule_retry(queue, QueuedTask { budget, ..queued });
            }
            None => {
                error!(
                    "item mint {} failed permanently after {} attempts",
                    correlation_id,
                    queued.budget.max_attempts()
                );
                self.finish_operation(correlation_id, TaskStatus::Failed);
                self.notifier
                    .notify(author_id, "Your NFT could not be minted.");
            }
        }
    }

    async fn run_transfer_item(&self, queued: QueuedTask, queue: &WeakUnboundedSender<QueuedTask>) {
        let Task::TransferItem {
            correlation_id,
            nft,
            dest_wallet,
        } = &queued.task
        else {
            return;
        };
        let (correlation_id, nft, dest_wallet) = (*correlation_id, *nft, *dest_wallet);
        info!(
            "{}: attempt {}/{}",
            queued.task.describe(),
            queued.budget.attempt(),
            queued.budget.max_attempts()
        );

        if !self.claim_operation(correlation_id) {
            return;
        }

        match self.client.transfer_nft(&nft, &dest_wallet).await {
            Ok(true) => {
                self.finish_operation(correlation_id, TaskStatus::Success);
                info!("item {} delivered to {}", nft, dest_wallet);
            }
            Ok(false) => {
                warn!("transfer of item {} did not confirm", nft);
                self.retry_or_fail_transfer(queued, queue, correlation_id, nft);
            }
            Err(e) => {
                error!("transfer of item {} errored: {}", nft, e);
                self.retry_or_fail_transfer(queued, queue, correlation_id, nft);
            }
        }
    }

    fn retry_or_fail_transfer(
        &self,
        queued: QueuedTask,
        queue: &WeakUnboundedSender<QueuedTask>,
        correlation_id: i64,
        nft: TonAddress,
    ) {
        match queued.budget.next_attempt() {
            Some(budget) => {
                info!(
                    "retrying {} in {:?} (attempt {}/{})",
                    queued.task.describe(),
                    budget.delay(),
                    budget.attempt(),
                    budget.max_attempts()
                );
                schedule_retry(queue, QueuedTask { budget, ..queued });
            }
            None => {
                error!(
                    "transfer of item {} failed permanently after {} attempts",
                    nft,
                    queued.budget.max_attempts()
                );
                self.finish_operation(correlation_id, TaskStatus::Failed);
            }
        }
    }

    async fn run_confirm_transaction(
        &self,
        queued: QueuedTask,
        queue: &WeakUnboundedSender<QueuedTask>,
    ) {
        let Task::ConfirmTransaction { transaction_id } = &queued.task else {
            return;
        };
        let transaction_id = *transaction_id;
        info!(
            "{}: attempt {}/{}",
            queued.task.describe(),
            queued.budget.attempt(),
            queued.budget.max_attempts()
        );

        let transaction = match self.ledger.transaction(transaction_id) {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                warn!("transaction {} not found, dropping its check", transaction_id);
                return;
            }
            Err(e) => {
                error!("could not load transaction {}: {}", transaction_id, e);
                return;
            }
        };
        if transaction.status.is_terminal() {
            info!(
                "transaction {} already settled as {}",
                transaction_id, transaction.status
            );
            return;
        }
        if let Err(e) = self
            .ledger
            .advance_transaction_status(transaction_id, TaskStatus::Pending)
        {
            error!("could not claim transaction {}: {}", transaction_id, e);
            return;
        }

        match self.lookup.transaction(&transaction.hash).await {
            Ok(data) => {
                let status = if data.success {
                    TaskStatus::Success
                } else {
                    TaskStatus::Failed
                };
                match self.ledger.advance_transaction_status(transaction_id, status) {
                    Ok(_) => info!("transaction {} settled as {}", transaction_id, status),
                    Err(e) => error!(
                        "could not record {} for transaction {}: {}",
                        status, transaction_id, e
                    ),
                }
            }
            Err(e) => {
                warn!("lookup for transaction {} failed: {}", transaction_id, e);
                match queued.budget.next_attempt() {
                    Some(budget) => {
                        info!(
                            "retrying {} in {:?} (attempt {}/{})",
                            queued.task.describe(),
                            budget.delay(),
                            budget.attempt(),
                            budget.max_attempts()
                        );
                        schedule_retry(queue, QueuedTask { budget, ..queued });
                    }
                    None => {
                        error!(
                            "confirmation of transaction {} crashed after {} attempts",
                            transaction_id,
                            queued.budget.max_attempts()
                        );
                        if let Err(e) = self
                            .ledger
                            .advance_transaction_status(transaction_id, TaskStatus::Crashed)
                        {
                            error!(
                                "could not record CRASHED for transaction {}: {}",
                                transaction_id, e
                            );
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AuthorRecord, MemoryLedger, NewTransaction};
    use crate::pipeline::LogNotifier;
    use crate::ton::endpoint::Selection;
    use crate::ton::testkit::*;
    use crate::tonapi::TransactionData;
    use std::sync::Mutex as StdMutex;
    use std::sync::Once;
    use std::time::Duration;

    static INIT: Once = Once::new();

    fn init_logger() {
        INIT.call_once(|| {
            env_logger::builder().is_test(true).try_init().ok();
        });
    }

    #[derive(Debug, Clone, Copy)]
    enum LookupOutcome {
        Settled(bool),
        Error,
    }

    struct StubLookup {
        outcomes: StdMutex<Vec<LookupOutcome>>,
    }

    impl StubLookup {
        fn with(outcomes: Vec<LookupOutcome>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes),
            }
        }
    }

    impl TransactionLookup for StubLookup {
        async fn transaction(&self, _hash: &str) -> anyhow::Result<TransactionData> {
            let next = {
                let mut outcomes = self.outcomes.lock().unwrap();
                if outcomes.is_empty() {
                    LookupOutcome::Settled(true)
                } else {
                    outcomes.remove(0)
                }
            };
            match next {
                LookupOutcome::Settled(success) => Ok(TransactionData { success }),
                LookupOutcome::Error => Err(anyhow::anyhow!("indexer unavailable")),
            }
        }
    }

    fn test_pipeline_config() -> PipelineConfig {
        PipelineConfig {
            workers: 2,
            mint_attempts: 2,
            mint_retry_delay_secs: 1,
            transfer_attempts: 2,
            transfer_retry_delay_secs: 1,
            transaction_attempts: 2,
            transaction_retry_delay_secs: 1,
            dependency_wait_attempts: 3,
            dependency_wait_delay_secs: 1,
        }
    }

    fn start_pipeline(
        net: SharedChain,
        ledger: Arc<MemoryLedger>,
        lookup: StubLookup,
    ) -> Pipeline<MockConnector, StubLookup> {
        let client = test_client(net, 3, Selection::Auto, 2);
        Pipeline::start(
            client,
            ledger,
            lookup,
            Arc::new(LogNotifier),
            test_pipeline_config(),
        )
    }

    fn author_with(id: i64, status: CollectionStatus) -> AuthorRecord {
        AuthorRecord {
            author_id: id,
            collection_name: "drops".to_string(),
            collection_address: None,
            collection_status: status,
            is_testnet: true,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..600 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached within the simulated deadline");
    }

    fn operation_status(ledger: &MemoryLedger, id: i64) -> Option<TaskStatus> {
        ledger.operation(id).unwrap().map(|op| op.status)
    }

    #[tokio::test(start_paused = true)]
    async fn collection_mint_runs_to_success() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        let outcome = pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Enqueued(10));

        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;
        let author = ledger.author(1).unwrap().unwrap();
        assert_eq!(author.collection_status, CollectionStatus::Minted);
        assert_eq!(author.collection_address, Some(collection_address()));

        let state = net.lock().unwrap();
        assert_eq!(state.accepted.len(), 1);
        assert!(state.accepted[0].message.has_state_init);
    }

    #[tokio::test(start_paused = true)]
    async fn collection_mint_is_idempotent_when_already_on_chain() {
        init_logger();
        let net = chain();
        net.lock()
            .unwrap()
            .accounts
            .insert(collection_address(), initialized_account());
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;

        assert!(net.lock().unwrap().send_attempts.is_empty());
        assert_eq!(
            ledger.author(1).unwrap().unwrap().collection_status,
            CollectionStatus::Minted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submission_of_a_live_operation_is_ignored() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        let first = pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        let second = pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        assert_eq!(first, SubmitOutcome::Enqueued(10));
        assert_eq!(second, SubmitOutcome::Ignored(10));

        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;
        assert_eq!(net.lock().unwrap().accepted.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_mint_budget_fails_author_and_operation_permanently() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_send_on = [0, 1, 2].into_iter().collect();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Failed)).await;

        assert_eq!(
            ledger.author(1).unwrap().unwrap().collection_status,
            CollectionStatus::Failed
        );
        // 2 task attempts x 2 sweeps x 3 endpoints
        assert_eq!(net.lock().unwrap().send_attempts.len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn item_mint_waits_for_the_collection_then_delivers() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::Pending)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        let target = addr(0x42);
        pipeline
            .mint_item(20, 1, collection_address(), target, "https://meta.test/items/0.json")
            .unwrap();

        // nothing reaches the chain while the sibling mint is pending
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(net.lock().unwrap().send_attempts.is_empty());

        ledger
            .advance_collection_status(1, CollectionStatus::Minted)
            .unwrap();
        wait_for(|| operation_status(&ledger, 20) == Some(TaskStatus::Success)).await;

        // the chained transfer delivers the item to the target wallet
        wait_for(|| operation_status(&ledger, 21) == Some(TaskStatus::Success)).await;
        let transfer = ledger.operation(21).unwrap().unwrap();
        assert_eq!(transfer.kind, OperationKind::TransferItem);
        assert_eq!(transfer.nft_address, Some(item_address(0)));
        assert_eq!(net.lock().unwrap().owners.get(&item_address(0)), Some(&target));
    }

    #[tokio::test(start_paused = true)]
    async fn item_mint_abandons_the_moment_the_collection_fails() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::Failed)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_item(20, 1, collection_address(), addr(0x42), "https://meta.test/items/0.json")
            .unwrap();
        wait_for(|| operation_status(&ledger, 20) == Some(TaskStatus::Failed)).await;
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dependency_wait_budget_is_finite() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::Pending)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_item(20, 1, collection_address(), addr(0x42), "https://meta.test/items/0.json")
            .unwrap();
        wait_for(|| operation_status(&ledger, 20) == Some(TaskStatus::Failed)).await;
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_to_an_already_correct_owner_sends_nothing() {
        init_logger();
        let net = chain();
        let nft = item_address(0);
        let target = addr(0x42);
        net.lock().unwrap().owners.insert(nft, target);
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline.transfer_item(30, nft, target).unwrap();
        wait_for(|| operation_status(&ledger, 30) == Some(TaskStatus::Success)).await;
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resubmitting_a_terminal_operation_restarts_it() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;

        let outcome = pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Restarted(10));

        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;
        // the fast path saw the deployed collection, so still only one send
        assert_eq!(net.lock().unwrap().accepted.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transaction_confirmation_settles_success_and_failure() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        let ok_id = ledger
            .insert_transaction(&NewTransaction {
                hash: "aa".to_string(),
                source: addr(0x01),
                destination: addr(0x02),
                amount: 5,
                is_testnet: true,
            })
            .unwrap();
        let bad_id = ledger
            .insert_transaction(&NewTransaction {
                hash: "bb".to_string(),
                source: addr(0x01),
                destination: addr(0x02),
                amount: 5,
                is_testnet: true,
            })
            .unwrap();
        let pipeline = start_pipeline(
            net,
            ledger.clone(),
            StubLookup::with(vec![LookupOutcome::Settled(true), LookupOutcome::Settled(false)]),
        );

        pipeline.confirm_transaction(ok_id).unwrap();
        wait_for(|| {
            ledger.transaction(ok_id).unwrap().unwrap().status == TaskStatus::Success
        })
        .await;

        pipeline.confirm_transaction(bad_id).unwrap();
        wait_for(|| {
            ledger.transaction(bad_id).unwrap().unwrap().status == TaskStatus::Failed
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lookup_errors_crash_the_transaction() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        let id = ledger
            .insert_transaction(&NewTransaction {
                hash: "cc".to_string(),
                source: addr(0x01),
                destination: addr(0x02),
                amount: 5,
                is_testnet: true,
            })
            .unwrap();
        let pipeline = start_pipeline(
            net,
            ledger.clone(),
            StubLookup::with(vec![LookupOutcome::Error, LookupOutcome::Error, LookupOutcome::Error]),
        );

        pipeline.confirm_transaction(id).unwrap();
        wait_for(|| ledger.transaction(id).unwrap().unwrap().status == TaskStatus::Crashed).await;
    }

    #[tokio::test(start_paused = true)]
    async fn confirming_a_settled_transaction_is_a_no_op() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        let id = ledger
            .insert_transaction(&NewTransaction {
                hash: "dd".to_string(),
                source: addr(0x01),
                destination: addr(0x02),
                amount: 5,
                is_testnet: true,
            })
            .unwrap();
        ledger.advance_transaction_status(id, TaskStatus::Pending).unwrap();
        ledger.advance_transaction_status(id, TaskStatus::Success).unwrap();
        let pipeline = start_pipeline(net, ledger.clone(), StubLookup::with(vec![]));

        let outcome = pipeline.confirm_transaction(id).unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyDone(id));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_the_queue() {
        init_logger();
        let net = chain();
        let ledger = Arc::new(MemoryLedger::new());
        ledger.upsert_author(&author_with(1, CollectionStatus::New)).unwrap();
        let pipeline = start_pipeline(net.clone(), ledger.clone(), StubLookup::with(vec![]));

        pipeline
            .mint_collection(10, 1, "https://meta.test/c.json", "https://meta.test/items/")
            .unwrap();
        wait_for(|| operation_status(&ledger, 10) == Some(TaskStatus::Success)).await;
        pipeline.shutdown().await;
    }
}
