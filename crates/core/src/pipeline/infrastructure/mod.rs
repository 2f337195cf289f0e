pub mod threaded_submission_dispatcher;
