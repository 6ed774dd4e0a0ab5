// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::io::Cursor;

use tokio::io::{AsyncWriteExt, BufReader};

use crate::ByteSource;

/// How the bytes of a test request become available to the reader.
#[derive(Copy, Clone, Debug)]
pub(crate) enum SourceKind {
    /// Everything at once.
    Buffered,

    /// In small pieces through a pipe, so that every reader has to deal with
    /// lines and chunks split over reads.
    Channel,
}

pub(crate) fn source(kind: SourceKind, data: Vec<u8>) -> Box<dyn ByteSource> {
    match kind {
        SourceKind::Buffered => Box::new(Cursor::new(data)),
        SourceKind::Channel => {
            let (reader, mut writer) = tokio::io::duplex(64);
            tokio::spawn(async move {
                for piece in data.chunks(7) {
                    if writer.write_all(piece).await.is_err() {
                        return;
                    }
                }
            });
            Box::new(BufReader::with_capacity(16, reader))
        }
    }
}
