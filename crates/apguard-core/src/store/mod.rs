pub mod settings;

pub use settings::ScopeSettings;
