use crate::DomainResult;
use crate::forms::Form;
use crate::ports::BoxFuture;

pub trait FormRepository: Send + Sync {
    fn get(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Option<Form>>>;

    fn get_by_key(&self, form_key: &str) -> BoxFuture<'_, DomainResult<Option<Form>>>;
}
