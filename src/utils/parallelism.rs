// Opt-out parallelism helpers in the style of the ones found in
// huggingface/tokenizers. Parallel execution is the default and can be
// disabled by setting the environment variable below to "false" or "0".
use rayon::prelude::*;
use rayon_cond::CondIterator;

pub const ENV_VARIABLE: &str = "CROSSALIGN_PARALLELISM";

/// Whether the fan-out helpers should actually run in parallel.
pub fn get_parallelism() -> bool {
    match std::env::var(ENV_VARIABLE) {
        Ok(mut v) => {
            v.make_ascii_lowercase();
            !matches!(v.as_ref(), "" | "false" | "f" | "off" | "no" | "n" | "0")
        }
        Err(_) => true,
    }
}

pub fn current_num_threads() -> usize {
    rayon::current_num_threads()
}

pub trait MaybeParallelRefIterator<'data, P, S>
where
    P: ParallelIterator,
    S: Iterator<Item = P::Item>,
{
    fn maybe_par_iter(&'data self) -> CondIterator<P, S> {
        self.maybe_par_iter_with_cond(get_parallelism())
    }

    fn maybe_par_iter_with_cond(&'data self, cond: bool) -> CondIterator<P, S>;
}

impl<'data, P, S, I: 'data + ?Sized> MaybeParallelRefIterator<'data, P, S> for I
where
    &'data I: IntoParallelIterator<Iter = P, Item = P::Item>
        + IntoIterator<IntoIter = S, Item = S::Item>,
    P: ParallelIterator,
    S: Iterator<Item = P::Item>,
{
    fn maybe_par_iter_with_cond(&'data self, cond: bool) -> CondIterator<P, S> {
        CondIterator::new(self, cond)
    }
}

pub trait MaybeParallelSlice<'data, T>
where
    T: Sync,
{
    fn maybe_par_chunks(
        &'_ self,
        chunk_size: usize,
    ) -> CondIterator<rayon::slice::Chunks<'_, T>, std::slice::Chunks<'_, T>>;
}

impl<T> MaybeParallelSlice<'_, T> for [T]
where
    T: Sync,
{
    fn maybe_par_chunks(
        &'_ self,
        chunk_size: usize,
    ) -> CondIterator<rayon::slice::Chunks<'_, T>, std::slice::Chunks<'_, T>> {
        if get_parallelism() {
            CondIterator::from_parallel(self.par_chunks(chunk_size))
        } else {
            CondIterator::from_serial(self.chunks(chunk_size))
        }
    }
}
