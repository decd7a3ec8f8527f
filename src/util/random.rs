use rand::Rng;
use std::ops::Range;
use std::sync::Arc;


/// Source of randomness for eviction decisions. Queues hold their own instance so tests can
///  inject a deterministic one.
#[cfg_attr(test, mockall::automock)]
pub trait Random: Send {
    fn gen_usize_range(&mut self, range: Range<usize>) -> usize;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn gen_usize_range(&mut self, range: Range<usize>) -> usize {
        rand::thread_rng().gen_range(range)
    }
}

/// Creates a fresh [Random] for every queue, including sub-queues created later on
pub type RandomFactory = Arc<dyn Fn() -> Box<dyn Random> + Send + Sync>;

pub fn rng_random_factory() -> RandomFactory {
    Arc::new(|| Box::new(RngRandom {}) as Box<dyn Random>)
}
