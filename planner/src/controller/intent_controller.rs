use super::tracer::Tracer;
use super::ttl_cache::TtlCache;
use super::StateSource;
use crate::config::ControllerConfig;
use crate::planner::Planner;
use crate::types::{Intent, Profile, ProfileType, Profiles, State};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// Drives planning for all known intents.
///
/// Nothing is planned before the first controller tick. After that every
/// change of intents or profiles, and every tick, enqueues the intents that
/// have no plan in the plan cache.
pub struct IntentController {
    cfg: ControllerConfig,
    warmup_done: AtomicBool,
    execution_paused: AtomicBool,
    plan_cache: Arc<TtlCache>,
    intents: RwLock<BTreeMap<String, Intent>>,
    profiles: RwLock<Profiles>,
    tasks: mpsc::Sender<String>,
    task_receiver: Mutex<Option<mpsc::Receiver<String>>>,
    planner: RwLock<Option<Arc<dyn Planner>>>,
    state_source: Arc<dyn StateSource>,
    tracer: Arc<dyn Tracer>,
}

impl IntentController {
    pub fn new(
        cfg: ControllerConfig,
        state_source: Arc<dyn StateSource>,
        tracer: Arc<dyn Tracer>,
    ) -> Arc<Self> {
        let (tasks, task_receiver) = mpsc::channel(cfg.task_channel_length.max(1));
        Arc::new(Self {
            plan_cache: TtlCache::new(cfg.plan_cache_ttl()),
            cfg,
            warmup_done: AtomicBool::new(false),
            execution_paused: AtomicBool::new(false),
            intents: RwLock::new(BTreeMap::new()),
            profiles: RwLock::new(Profiles::new()),
            tasks,
            task_receiver: Mutex::new(Some(task_receiver)),
            planner: RwLock::new(None),
            state_source,
            tracer,
        })
    }

    /// Replace the planner. Rounds already running finish with the previous one.
    pub fn set_planner(&self, planner: Arc<dyn Planner>) {
        *self.planner.write().unwrap_or_else(PoisonError::into_inner) = Some(planner);
    }

    fn planner(&self) -> Option<Arc<dyn Planner>> {
        self.planner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_warm(&self) -> bool {
        self.warmup_done.load(Ordering::SeqCst)
    }

    /// While paused plans are still created and traced but not executed.
    pub fn set_execution_paused(&self, paused: bool) {
        self.execution_paused.store(paused, Ordering::SeqCst);
    }

    pub fn plan_cache(&self) -> &Arc<TtlCache> {
        &self.plan_cache
    }

    pub fn intent(&self, key: &str) -> Option<Intent> {
        self.intents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn profiles(&self) -> Profiles {
        self.profiles.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Add or replace an intent; a negative priority removes it.
    pub async fn update_intent(&self, intent: Intent) {
        {
            let mut intents = self.intents.write().unwrap_or_else(PoisonError::into_inner);
            if intent.priority >= 0.0 {
                intents.insert(intent.key.clone(), intent);
            } else {
                intents.remove(&intent.key);
            }
        }
        self.process_intents().await;
    }

    /// Add or replace a profile; an obsolete profile removes it.
    pub async fn update_profile(&self, profile: Profile) {
        {
            let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
            if profile.profile_type == ProfileType::Obsolete {
                profiles.remove(&profile.key);
            } else {
                profiles.insert(profile.key.clone(), profile);
            }
        }
        self.process_intents().await;
    }

    async fn process_intents(&self) {
        if !self.is_warm() {
            return;
        }
        let pending: Vec<String> = self
            .intents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| !self.plan_cache.contains(key))
            .cloned()
            .collect();
        for key in pending {
            if self.tasks.send(key).await.is_err() {
                warn!("Task channel closed; dropping remaining intents.");
                return;
            }
        }
    }

    /// One controller tick: ends warm-up and enqueues pending intents.
    pub async fn tick(&self) {
        if !self.warmup_done.swap(true, Ordering::SeqCst) {
            info!("Controller warm-up done.");
        }
        self.process_intents().await;
    }

    /// Spawn `workers` planning workers, the controller ticker and the plan
    /// cache purge. All of them end once `shutdown` flips to true. Returns no
    /// tasks when the controller already runs.
    pub async fn run(self: &Arc<Self>, workers: usize, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Some(receiver) = self.task_receiver.lock().await.take() else {
            warn!("Intent controller is already running.");
            return Vec::new();
        };
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(workers + 2);
        for id in 0..workers {
            let controller = Arc::clone(self);
            let receiver = Arc::clone(&receiver);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                controller.worker(id, receiver, shutdown).await;
            }));
        }
        info!("Started {} worker(s).", workers);

        let controller = Arc::clone(self);
        let ticker_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.cfg.controller_timeout());
            ticker.tick().await;
            let stopped = crate::plugins::wait_for_shutdown(ticker_shutdown);
            tokio::pin!(stopped);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        debug!("Controller tick.");
                        controller.tick().await;
                    }
                    _ = &mut stopped => break,
                }
            }
        }));
        handles.push(self.plan_cache.spawn_purge(self.cfg.plan_cache_timeout(), shutdown));
        handles
    }

    async fn worker(
        &self,
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<String>>>,
        shutdown: watch::Receiver<bool>,
    ) {
        let stopped = crate::plugins::wait_for_shutdown(shutdown);
        tokio::pin!(stopped);
        loop {
            let key = tokio::select! {
                biased;
                _ = &mut stopped => break,
                key = async { receiver.lock().await.recv().await } => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            debug!("Worker {} looking at: {}.", id, key);
            self.reconcile(&key).await;
        }
    }

    /// Plan, execute and trace one intent.
    pub async fn reconcile(&self, key: &str) {
        let Some(planner) = self.planner() else {
            info!("No planner configured.");
            return;
        };
        let Some(intent) = self.intent(key) else {
            debug!("Intent {} is gone.", key);
            return;
        };
        let profiles = self.profiles();
        let current = match self.state_source.current_state(&intent, &profiles).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Could not get the current state of {}: {}", key, e);
                return;
            }
        };
        let desired = State {
            intent,
            ..Default::default()
        };

        let plan = planner.create_plan(&current, &desired, &profiles).await;
        info!(
            "Planner output for {} was: {:?}",
            key,
            plan.iter().map(|a| a.name.as_str()).collect::<Vec<_>>()
        );
        if !plan.is_empty() && !self.execution_paused.load(Ordering::SeqCst) {
            debug!("Triggering execution of plan for: {}.", key);
            planner.execute_plan(&current, &plan).await;
            self.plan_cache.put(key);
        }
        debug!("Triggering effect calculation for: {}.", key);
        planner.trigger_effect(&current, &profiles).await;
        self.tracer.trace_event(&current, &desired, &plan);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{StateSourceError, TracerError};
    use crate::types::Action;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug)]
    enum Call {
        Plan(BTreeMap<String, f64>),
        Execute(Vec<String>),
        Effect,
    }

    struct RecordingPlanner {
        plan: Vec<Action>,
        calls: mpsc::UnboundedSender<Call>,
    }

    #[async_trait]
    impl Planner for RecordingPlanner {
        async fn create_plan(&self, _current: &State, desired: &State, _profiles: &Profiles) -> Vec<Action> {
            let _ = self.calls.send(Call::Plan(desired.intent.objectives.clone()));
            self.plan.clone()
        }

        async fn execute_plan(&self, _state: &State, plan: &[Action]) {
            let _ = self
                .calls
                .send(Call::Execute(plan.iter().map(|a| a.name.clone()).collect()));
        }

        async fn trigger_effect(&self, _current: &State, _profiles: &Profiles) {
            let _ = self.calls.send(Call::Effect);
        }

        async fn stop(&self) {}
    }

    struct FixedSource;

    #[async_trait]
    impl StateSource for FixedSource {
        async fn current_state(&self, intent: &Intent, _profiles: &Profiles) -> Result<State, StateSourceError> {
            if intent.target_key == "missing" {
                return Err(StateSourceError::NotFound(intent.target_key.clone()));
            }
            let mut state = State::default();
            state.intent.key = intent.key.clone();
            state.intent.objectives.insert("p99".to_string(), 150.0);
            Ok(state)
        }
    }

    #[derive(Default)]
    struct CountingTracer {
        events: std::sync::Mutex<Vec<String>>,
    }

    impl Tracer for CountingTracer {
        fn trace_event(&self, _current: &State, desired: &State, _plan: &[Action]) {
            self.events.lock().unwrap().push(desired.intent.key.clone());
        }

        fn get_effect(&self, name: &str, group: &str, profile: &str, _: u32) -> Result<serde_json::Value, TracerError> {
            Err(TracerError::NotFound {
                name: name.to_string(),
                group: group.to_string(),
                profile: profile.to_string(),
            })
        }
    }

    fn intent(key: &str, priority: f64) -> Intent {
        Intent {
            key: key.to_string(),
            priority,
            target_key: "default/my-deployment".to_string(),
            target_kind: "Deployment".to_string(),
            objectives: BTreeMap::from([("p99".to_string(), 50.0)]),
        }
    }

    fn setup(plan: Vec<Action>) -> (Arc<IntentController>, Arc<CountingTracer>, mpsc::UnboundedReceiver<Call>) {
        let tracer = Arc::new(CountingTracer::default());
        let controller = IntentController::new(ControllerConfig::default(), Arc::new(FixedSource), tracer.clone());
        let (calls, rx) = mpsc::unbounded_channel();
        controller.set_planner(Arc::new(RecordingPlanner { plan, calls }));
        (controller, tracer, rx)
    }

    async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>) -> Call {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_intents_and_profiles_bookkeeping() {
        let (controller, _, _) = setup(vec![]);
        controller.update_intent(intent("default/a", 1.0)).await;
        assert!(controller.intent("default/a").is_some());
        controller.update_intent(intent("default/a", -1.0)).await;
        assert!(controller.intent("default/a").is_none());

        controller
            .update_profile(Profile::new("default/p99", ProfileType::Latency))
            .await;
        assert_eq!(controller.profiles().len(), 1);
        controller
            .update_profile(Profile::new("default/p99", ProfileType::Obsolete))
            .await;
        assert!(controller.profiles().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_planned_before_warm_up() {
        let (controller, _, mut rx) = setup(vec![Action::new("scale_out")]);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = controller.run(1, shutdown_rx).await;

        controller.update_intent(intent("default/a", 1.0)).await;
        assert!(!controller.is_warm());
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        shutdown.send_replace(true);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_plan_executed_and_cached() {
        let (controller, tracer, mut rx) = setup(vec![Action::new("scale_out")]);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handles = controller.run(2, shutdown_rx).await;
        assert!(controller.run(1, watch::channel(false).1).await.is_empty());

        controller.update_intent(intent("default/a", 1.0)).await;
        controller.tick().await;

        match next_call(&mut rx).await {
            Call::Plan(objectives) => assert_eq!(objectives.get("p99"), Some(&50.0)),
            other => panic!("unexpected call {:?}", other),
        }
        match next_call(&mut rx).await {
            Call::Execute(plan) => assert_eq!(plan, vec!["scale_out".to_string()]),
            other => panic!("unexpected call {:?}", other),
        }
        assert!(matches!(next_call(&mut rx).await, Call::Effect));
        assert!(controller.plan_cache().contains("default/a"));

        // the intent has a recent plan
        controller.tick().await;
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert_eq!(*tracer.events.lock().unwrap(), vec!["default/a".to_string()]);

        shutdown.send_replace(true);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_paused_execution() {
        let (controller, tracer, mut rx) = setup(vec![Action::new("scale_out")]);
        controller.set_execution_paused(true);
        controller.update_intent(intent("default/a", 1.0)).await;
        controller.reconcile("default/a").await;

        assert!(matches!(next_call(&mut rx).await, Call::Plan(_)));
        assert!(matches!(next_call(&mut rx).await, Call::Effect));
        assert!(!controller.plan_cache().contains("default/a"));
        assert_eq!(tracer.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_plan_not_cached() {
        let (controller, _, mut rx) = setup(vec![]);
        controller.update_intent(intent("default/a", 1.0)).await;
        controller.reconcile("default/a").await;

        assert!(matches!(next_call(&mut rx).await, Call::Plan(_)));
        assert!(matches!(next_call(&mut rx).await, Call::Effect));
        assert!(!controller.plan_cache().contains("default/a"));
    }

    #[tokio::test]
    async fn test_unobservable_target_skipped() {
        let (controller, tracer, mut rx) = setup(vec![Action::new("scale_out")]);
        let mut broken = intent("default/a", 1.0);
        broken.target_key = "missing".to_string();
        controller.update_intent(broken).await;
        controller.reconcile("default/a").await;

        assert!(rx.try_recv().is_err());
        assert!(tracer.events.lock().unwrap().is_empty());
    }
}
