pub mod types;

pub use types::{
    ApiCredential, ChainTransaction, Merchant, PaymentRequest, PaymentStatus, TransactionStatus,
    Wallet,
};
