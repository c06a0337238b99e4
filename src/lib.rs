// Neural Inbox — second-brain capture service.
//
// A chat endpoint ingests heterogeneous messages (text, voice, photos,
// documents, forwards, links), classifies them into a small fixed taxonomy
// with an LLM, persists them with lexical + semantic indexes, links them
// to prior records, and serves retrieval and mutation through a management
// agent and a companion HTTP API.
//
// Layering:
//   atoms/  — pure data types, constants, the error enum
//   engine/ — store, search, pipeline, agent loop, scheduler, ports
//   api/    — companion-client REST surface

pub mod api;
pub mod atoms;
pub mod engine;
