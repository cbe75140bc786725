/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::codec::DecodeError;
use bytes::Buf;

/// Bounds-checked big-endian cursor over a received frame.
pub(super) struct FrameReader<'a> {
    remaining: &'a [u8],
    total: usize,
}

impl<'a> FrameReader<'a> {
    pub(super) fn new(frame: &'a [u8]) -> Self {
        Self {
            remaining: frame,
            total: frame.len(),
        }
    }

    fn ensure(&self, len: usize) -> Result<(), DecodeError> {
        if self.remaining.len() < len {
            let consumed = self.total - self.remaining.len();
            return Err(DecodeError::Truncated {
                needed: consumed + len,
                available: self.total,
            });
        }
        Ok(())
    }

    pub(super) fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let (head, tail) = self.remaining.split_at(len);
        self.remaining = tail;
        Ok(head)
    }

    pub(super) fn u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.remaining.get_u8())
    }

    pub(super) fn u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.remaining.get_u16())
    }

    pub(super) fn u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        Ok(self.remaining.get_u32())
    }

    pub(super) fn i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.remaining.get_i32())
    }

    pub(super) fn u64(&mut self) -> Result<u64, DecodeError> {
        self.ensure(8)?;
        Ok(self.remaining.get_u64())
    }
}
