//! Time-based expiry of unpaid charges.

use crate::charge::ChargeStatus;
use crate::error::{ChargeError, ChargeResult};
use crate::store::ChargeStore;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct ExpirySweeper {
    store: Arc<dyn ChargeStore>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn ChargeStore>) -> Self {
        Self { store }
    }

    /// Expire pending charges due before `today`; returns how many moved
    #[instrument(skip(self))]
    pub async fn sweep(&self, today: NaiveDate) -> ChargeResult<usize> {
        let mut expired = 0;
        for charge in self.store.list_overdue(today).await? {
            match self
                .store
                .update_status(&charge.id, ChargeStatus::Pending, ChargeStatus::Expired, None)
                .await
            {
                Ok(_) => expired += 1,
                // lost the race to a notification
                Err(ChargeError::InvalidTransition { actual, .. }) => {
                    debug!("Charge {} already {}", charge.id, actual);
                }
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!("Expired {} overdue charges", expired);
        }
        Ok(expired)
    }
}
