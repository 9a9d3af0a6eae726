pub mod admin;
pub mod alerts;
pub mod feedback;
pub mod health;
pub mod push;
pub mod reports;

use nearwatch_core::gate::Caller;
use nearwatch_shared::middleware::OptionalOperator;

pub(crate) fn caller(operator: &OptionalOperator) -> Caller {
    if operator.is_admin() {
        Caller::Admin
    } else {
        Caller::Public
    }
}
