/// Chrome Trace (flame-style) execution profiler.
///
/// Feature-gated span recording for the distributed array engine. When the
/// `profiling` feature is enabled, spans around directory population,
/// materialization, collection, broadcasts, reductions and every executed
/// block task are written as a **Chrome Trace Event JSON** file that can be
/// inspected in `chrome://tracing` or <https://ui.perfetto.dev>.
///
/// ```bash
/// cargo bench --features profiling
/// ```
///
/// With the feature disabled every call compiles to a no-op.
///
/// ## Usage
///
/// ```no_run
/// use pgas_array::profiler;
///
/// profiler::init("profile/trace.json");
/// {
///     let _g = profiler::span("collect");
///     // materialize / collect a distributed array
/// }
/// profiler::shutdown();
/// ```
///
/// ## Design notes
///
/// - Spans are RAII guards (`SpanGuard`)
/// - Pool threads register their names on start
/// - Output uses Chrome Trace `"X"` complete events in category `darray`
pub mod profiler;
