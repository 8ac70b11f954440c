// SPDX-License-Identifier: Apache-2.0

pub mod fanout;
pub mod pipeline;
