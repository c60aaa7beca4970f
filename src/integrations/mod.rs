pub mod gmail;

pub use gmail::GmailCodeSource;
