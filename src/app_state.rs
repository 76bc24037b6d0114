//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use rusqlite::Connection;

use crate::{
    Error,
    categorization::{
        Categorize, CategorizationPipeline, CostGuard, JobQueue, LanguageModelClassifier,
        PipelineStores, SQLiteCategorizationStore, StatisticalClassifier,
    },
    config::CategorizationConfig,
    db::initialize,
};

/// The state of the REST server.
#[derive(Clone)]
pub struct AppState {
    /// The database connection
    pub db_connection: Arc<Mutex<Connection>>,

    /// Runs categorization requests made through the API.
    pub categorizer: Arc<dyn Categorize>,

    /// The queue read by the background categorization worker.
    pub job_queue: JobQueue,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for the domain models
    /// and build the categorization pipeline from `config`, wrapped in a [CostGuard].
    ///
    /// # Errors
    /// Returns an error if `config` is invalid or the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        config: CategorizationConfig,
        job_queue: JobQueue,
    ) -> Result<Self, Error> {
        Self::with_classifiers(db_connection, config, job_queue, None, None)
    }

    /// Like [AppState::new], with external classifiers for the model stages.
    pub fn with_classifiers(
        db_connection: Connection,
        config: CategorizationConfig,
        job_queue: JobQueue,
        statistical_classifier: Option<Arc<dyn StatisticalClassifier>>,
        language_model: Option<Arc<dyn LanguageModelClassifier>>,
    ) -> Result<Self, Error> {
        config.validate()?;
        initialize(&db_connection)?;

        let connection = Arc::new(Mutex::new(db_connection));
        let stores = PipelineStores::sqlite(SQLiteCategorizationStore::new(connection.clone()));

        let mut builder = CategorizationPipeline::builder(stores, config.clone());
        if let Some(classifier) = statistical_classifier {
            builder = builder.statistical_classifier(classifier);
        }
        if let Some(classifier) = language_model {
            builder = builder.language_model(classifier);
        }

        let categorizer = CostGuard::new(builder.build(), config.cost_guard);

        Ok(Self {
            db_connection: connection,
            categorizer: Arc::new(categorizer),
            job_queue,
        })
    }
}

/// The state needed to run categorization in a request.
#[derive(Clone)]
pub struct CategorizeState {
    pub db_connection: Arc<Mutex<Connection>>,
    pub categorizer: Arc<dyn Categorize>,
}

impl FromRef<AppState> for CategorizeState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            categorizer: state.categorizer.clone(),
        }
    }
}

/// The state needed to queue background jobs.
#[derive(Debug, Clone)]
pub struct JobState {
    pub job_queue: JobQueue,
}

impl FromRef<AppState> for JobState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            job_queue: state.job_queue.clone(),
        }
    }
}

/// The state needed to review candidates and correct categories.
#[derive(Debug, Clone)]
pub struct ReviewState {
    pub db_connection: Arc<Mutex<Connection>>,
}

impl FromRef<AppState> for ReviewState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
        }
    }
}
