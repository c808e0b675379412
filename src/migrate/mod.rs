pub mod batch_migrator;
pub mod inspector;
pub mod migration_options;
pub mod migration_result;
pub mod migrator;
pub mod rollback;
pub mod validator;
pub mod watermark;
