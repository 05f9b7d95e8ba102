mod run;

pub use run::run_kubecerts;
